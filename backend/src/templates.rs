//! Page templates, rendered with handlebars.

/// Shared page head, opens `<body>`.
pub const HEADER: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{title}}</title>
<style>
body { font-family: sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; }
table { border-collapse: collapse; width: 100%; }
th, td { padding: .3rem .6rem; border-bottom: 1px solid #ddd; }
td.num { text-align: right; font-variant-numeric: tabular-nums; }
.error { color: #a00; }
.user { text-align: right; }
</style>
</head>
<body>
{{#if user}}<p class="user">{{user}} &middot; <a href="/logout">Log out</a></p>{{/if}}
"#;

pub const FOOTER: &str = "</body>\n</html>\n";

/// One dispatch step: label plus optional reason.
pub const OUTCOME: &str = r#"{{#if failed}}<span class="error">{{/if}}{{label}}{{#if detail}} ({{detail}}){{/if}}{{#if failed}}</span>{{/if}}"#;

pub const INDEX: &str = r#"{{> header}}
<h1>{{title}}</h1>
{{#if error}}<p class="error">{{error}}</p>{{/if}}
<form method="post" action="/submit">
<label>Date <input type="date" name="date" value="{{today}}" required></label>
<label>Meter reading ({{unit}}) <input type="text" name="meter_reading" inputmode="decimal" required></label>
<label>Unit price ({{currency}}/{{unit}}) <input type="text" name="unit_price" inputmode="decimal" value="{{price}}" required></label>
<label><input type="checkbox" name="send_mail" value="on" checked> email statement</label>
<label><input type="checkbox" name="upload_archive" value="on" checked> archive statement</label>
<button type="submit">Save reading</button>
</form>
<h2>History</h2>
{{#if rows}}
<table>
<tr><th>Date</th><th>Meter reading</th><th>Consumption</th><th>Unit price</th><th>Amount</th><th></th></tr>
{{#each rows}}
<tr><td>{{date}}</td><td class="num">{{reading}}</td><td class="num">{{consumption}}</td><td class="num">{{price}}</td><td class="num">{{amount}} {{../currency}}</td><td><a href="/invoice/{{iso}}">PDF</a></td></tr>
{{/each}}
</table>
<form method="post" action="/statement">
<label><input type="checkbox" name="send_mail" value="on"> email</label>
<label><input type="checkbox" name="upload_archive" value="on"> archive</label>
<button type="submit">Resend latest statement</button>
</form>
{{else}}
<p>No readings recorded yet.</p>
{{/if}}
{{> footer}}"#;

pub const SUMMARY: &str = r#"{{> header}}
<h1>{{title}} {{date}}</h1>
<p>Meter reading {{reading}} {{unit}}, consumption {{consumption}} {{unit}}, amount {{amount}} {{currency}}.</p>
<table>
<tr><th>Statement</th><td>{{#if stored}}<a href="/invoice/{{iso}}">{{/if}}{{#with statement}}{{> outcome}}{{/with}}{{#if stored}}</a>{{/if}}</td></tr>
<tr><th>Email</th><td>{{#with mail}}{{> outcome}}{{/with}}</td></tr>
<tr><th>Archive</th><td>{{#with archive}}{{> outcome}}{{/with}}</td></tr>
</table>
<p><a href="/">Back</a></p>
{{> footer}}"#;

pub const ERROR: &str = r#"{{> header}}
<h1>Not saved</h1>
<p class="error">{{message}}</p>
<p><a href="/">Back</a></p>
{{> footer}}"#;

pub const AUTH_ERROR: &str = r#"{{> header}}
<h1>Login failed</h1>
<p class="error">{{message}}</p>
<p><a href="/login">Try again</a></p>
{{> footer}}"#;
