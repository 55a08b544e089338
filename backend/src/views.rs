use crate::auth::AuthUser;
use crate::services::{DispatchReport, Outcome};
use crate::templates;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::NaiveDate;
use handlebars::{Handlebars, RenderError, TemplateError};
use meterbill::report::StatementConfig;
use meterbill::stat::Row;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::error;

/// `12345.5` -> `12.345,5`
pub fn thousands(value: Decimal) -> String {
    let text = value.normalize().to_string();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let mut grouped = String::new();
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped},{frac}")
    }
}

pub struct IndexView<'a> {
    pub config: &'a StatementConfig,
    pub rows: Vec<&'a Row>,
    pub today: NaiveDate,
    pub user: Option<&'a AuthUser>,
    pub error: Option<String>,
}

#[derive(Serialize)]
struct HistoryRow {
    date: String,
    iso: String,
    reading: String,
    consumption: String,
    price: String,
    amount: String,
}

impl HistoryRow {
    fn new(row: &Row) -> Self {
        Self {
            date: row.date_label(),
            iso: row.date.format("%Y-%m-%d").to_string(),
            reading: thousands(row.meter_reading),
            consumption: thousands(row.consumption),
            price: row.unit_price.normalize().to_string(),
            amount: format!("{:.2}", row.amount_due),
        }
    }
}

#[derive(Serialize)]
struct IndexData<'a> {
    title: &'a str,
    user: Option<&'a str>,
    error: Option<&'a str>,
    today: String,
    unit: &'a str,
    currency: &'a str,
    price: String,
    rows: Vec<HistoryRow>,
}

#[derive(Serialize)]
struct OutcomeData<'a> {
    label: &'static str,
    detail: Option<&'a str>,
    failed: bool,
}

impl<'a> From<&'a Outcome> for OutcomeData<'a> {
    fn from(outcome: &'a Outcome) -> Self {
        let (label, detail) = match outcome {
            Outcome::Done => ("OK", None),
            Outcome::Skipped(why) => ("skipped", Some(why.as_str())),
            Outcome::Failed(why) => ("failed", Some(why.as_str())),
        };
        Self {
            label,
            detail,
            failed: matches!(outcome, Outcome::Failed(_)),
        }
    }
}

#[derive(Serialize)]
struct SummaryData<'a> {
    title: &'a str,
    user: Option<&'a str>,
    date: String,
    iso: String,
    reading: String,
    consumption: String,
    amount: String,
    unit: &'a str,
    currency: &'a str,
    stored: bool,
    statement: OutcomeData<'a>,
    mail: OutcomeData<'a>,
    archive: OutcomeData<'a>,
}

#[derive(Serialize)]
struct MessageData<'a> {
    title: &'a str,
    user: Option<&'a str>,
    message: &'a str,
}

/// The registered page templates. Values are HTML-escaped on render.
pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_partial("header", templates::HEADER)?;
        registry.register_partial("footer", templates::FOOTER)?;
        registry.register_partial("outcome", templates::OUTCOME)?;
        registry.register_template_string("index", templates::INDEX)?;
        registry.register_template_string("summary", templates::SUMMARY)?;
        registry.register_template_string("error", templates::ERROR)?;
        registry.register_template_string("auth_error", templates::AUTH_ERROR)?;
        Ok(Self { registry })
    }

    fn html<T: Serialize>(&self, name: &str, data: &T) -> Result<String, RenderError> {
        self.registry.render(name, data)
    }

    fn respond<T: Serialize>(&self, status: StatusCode, name: &str, data: &T) -> Response {
        match self.html(name, data) {
            Ok(page) => (status, Html(page)).into_response(),
            Err(e) => {
                error!(template = name, "page rendering failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "page rendering failed").into_response()
            }
        }
    }

    pub fn index(&self, status: StatusCode, view: &IndexView<'_>) -> Response {
        let cfg = view.config;
        let data = IndexData {
            title: &cfg.title,
            user: view.user.map(AuthUser::display_name),
            error: view.error.as_deref(),
            today: view.today.format("%Y-%m-%d").to_string(),
            unit: &cfg.unit,
            currency: &cfg.currency,
            price: view
                .rows
                .first()
                .map(|r| r.unit_price.normalize().to_string())
                .unwrap_or_default(),
            rows: view.rows.iter().map(|r| HistoryRow::new(r)).collect(),
        };
        self.respond(status, "index", &data)
    }

    pub fn summary(
        &self,
        report: &DispatchReport,
        config: &StatementConfig,
        user: Option<&AuthUser>,
    ) -> Response {
        let row = &report.row;
        let data = SummaryData {
            title: &config.title,
            user: user.map(AuthUser::display_name),
            date: row.date_label(),
            iso: row.date.format("%Y-%m-%d").to_string(),
            reading: thousands(row.meter_reading),
            consumption: thousands(row.consumption),
            amount: format!("{:.2}", row.amount_due),
            unit: &config.unit,
            currency: &config.currency,
            stored: report.stored.is_some(),
            statement: (&report.statement).into(),
            mail: (&report.mail).into(),
            archive: (&report.archive).into(),
        };
        self.respond(StatusCode::OK, "summary", &data)
    }

    pub fn error(&self, status: StatusCode, message: &str, user: Option<&AuthUser>) -> Response {
        let data = MessageData {
            title: "Error",
            user: user.map(AuthUser::display_name),
            message,
        };
        self.respond(status, "error", &data)
    }

    pub fn auth_error(&self, status: StatusCode, message: &str) -> Response {
        let data = MessageData {
            title: "Login failed",
            user: None,
            message,
        };
        self.respond(status, "auth_error", &data)
    }
}
