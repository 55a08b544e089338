use crate::auth::AuthUser;
use crate::routes::AppState;
use crate::views::IndexView;
use axum::{
    extract::{Form, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{Local, NaiveDate};
use meterbill::outbox::ArchiveDocument;
use meterbill::stat::{parse_decimal, Ledger, Reading, Row, Totals, DATE_FORMAT, STATEMENT_HISTORY};
use meterbill::Error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// HTTP status for a failure of the ledger pipeline.
pub fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Persistence(_) | Error::Delivery(_) | Error::Archive(_) => StatusCode::BAD_GATEWAY,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Format(_) | Error::Parse { .. } | Error::Render(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Result of one secondary step after a row was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub row: Row,
    pub statement: Outcome,
    /// Path of the stored statement, when writing it succeeded.
    pub stored: Option<PathBuf>,
    pub mail: Outcome,
    pub archive: Outcome,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    pub send_mail: bool,
    pub upload_archive: bool,
}

/// `<title>-YYYY-MM-DD.pdf`, with anything unsafe in a file name replaced.
pub fn statement_file_name(title: &str, date: NaiveDate) -> String {
    let title: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{title}-{}.pdf", date.format("%Y-%m-%d"))
}

fn checked(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|v| !v.is_empty() && v != "off")
}

/// Dates from the form arrive as `YYYY-MM-DD`, typed ones may use the ledger
/// layout.
fn parse_form_date(input: &str) -> Result<NaiveDate, Error> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(input, DATE_FORMAT))
        .map_err(|_| Error::Validation(format!("{input:?} is not a valid date")))
}

/// Renders, stores and optionally mails and archives the statement for the
/// newest row. Nothing here can undo the persisted row.
pub async fn dispatch(
    state: &AppState,
    rows: &[Row],
    options: DispatchOptions,
) -> Result<DispatchReport, Error> {
    let row = rows
        .last()
        .cloned()
        .ok_or_else(|| Error::Render("no ledger rows to render".into()))?;
    let mut report = DispatchReport {
        row: row.clone(),
        statement: Outcome::Done,
        stored: None,
        mail: Outcome::Skipped("not requested".into()),
        archive: Outcome::Skipped("not requested".into()),
    };

    let pdf = match state.renderer.render(rows, true) {
        Ok(pdf) => pdf,
        Err(e) => {
            error!(date = %row.date_label(), "statement rendering failed: {e}");
            report.statement = Outcome::Failed(e.to_string());
            report.mail = Outcome::Skipped("no statement".into());
            report.archive = Outcome::Skipped("no statement".into());
            return Ok(report);
        }
    };

    let cfg = state.renderer.config();
    let path = state.invoice_dir.join(statement_file_name(&cfg.title, row.date));
    let written: std::io::Result<()> = async {
        tokio::fs::create_dir_all(&state.invoice_dir).await?;
        tokio::fs::write(&path, &pdf).await
    }
    .await;
    match written {
        Ok(()) => report.stored = Some(path),
        Err(e) => {
            warn!(path = %path.display(), "could not store statement: {e}");
            report.statement = Outcome::Failed(format!("could not store statement: {e}"));
        }
    }

    let subject = format!("{} {}", cfg.title, row.date_label());
    let attachment = format!("{subject}.pdf");

    if options.send_mail {
        report.mail = match &state.notifier {
            None => Outcome::Skipped("mail is not configured".into()),
            Some(notifier) => {
                let body = format!(
                    "Hello,\n\nattached is the statement of {date}: {consumption} {unit} at {price} {cur}/{unit}, {amount:.2} {cur} in total.\n",
                    date = row.date_label(),
                    consumption = row.consumption.normalize(),
                    unit = cfg.unit,
                    price = row.unit_price.normalize(),
                    cur = cfg.currency,
                    amount = row.amount_due,
                );
                match notifier
                    .send(&pdf, &attachment, notifier.recipients(), &subject, &body)
                    .await
                {
                    Ok(()) => Outcome::Done,
                    Err(e) => Outcome::Failed(e.to_string()),
                }
            }
        };
    }

    if options.upload_archive {
        report.archive = match &state.archiver {
            None => Outcome::Skipped("archive is not configured".into()),
            Some(archiver) => {
                let doc = ArchiveDocument {
                    title: subject.clone(),
                    created: row.date,
                    filename: attachment.clone(),
                };
                match archiver.upload_statement(pdf.clone(), &doc).await {
                    Ok(()) => Outcome::Done,
                    Err(e) => Outcome::Failed(e.to_string()),
                }
            }
        };
    }

    Ok(report)
}

fn failure(state: &AppState, err: &Error, user: Option<&AuthUser>) -> Response {
    state.views.error(error_status(err), &err.to_string(), user)
}

pub async fn index(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
) -> Response {
    let user = user.map(|Extension(u)| u);
    let (ledger, error, status) = match state.store.load().await {
        Ok(ledger) => (ledger, None, StatusCode::OK),
        Err(e) => {
            warn!("ledger unavailable: {e}");
            let status = error_status(&e);
            (Ledger::default(), Some(e.to_string()), status)
        }
    };
    let view = IndexView {
        config: state.renderer.config(),
        rows: ledger.recent(STATEMENT_HISTORY).collect(),
        today: Local::now().date_naive(),
        user: user.as_ref(),
        error,
    };
    state.views.index(status, &view)
}

#[derive(Debug, Deserialize)]
pub struct SubmitForm {
    pub date: String,
    pub meter_reading: String,
    pub unit_price: String,
    pub send_mail: Option<String>,
    pub upload_archive: Option<String>,
}

fn parse_reading(form: &SubmitForm) -> Result<Reading, Error> {
    Ok(Reading::new(
        parse_form_date(&form.date)?,
        parse_decimal(&form.meter_reading)?,
        parse_decimal(&form.unit_price)?,
    ))
}

pub async fn submit(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<SubmitForm>,
) -> Response {
    let user = user.map(|Extension(u)| u);
    let reading = match parse_reading(&form) {
        Ok(r) => r,
        Err(e) => return failure(&state, &e, user.as_ref()),
    };

    let ledger = match state.store.record(&reading).await {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!(date = %reading.date, "reading rejected: {e}");
            return failure(&state, &e, user.as_ref());
        }
    };
    info!(
        rows = ledger.len(),
        user = user.as_ref().map(|u| u.sub.as_str()).unwrap_or("-"),
        "reading recorded"
    );

    let options = DispatchOptions {
        send_mail: checked(&form.send_mail),
        upload_archive: checked(&form.upload_archive),
    };
    match dispatch(&state, &ledger.rows, options).await {
        Ok(report) => state.views.summary(&report, state.renderer.config(), user.as_ref()),
        Err(e) => failure(&state, &e, user.as_ref()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResendForm {
    pub send_mail: Option<String>,
    pub upload_archive: Option<String>,
}

/// Re-renders the statement of the newest row without touching the ledger.
pub async fn resend(
    State(state): State<AppState>,
    user: Option<Extension<AuthUser>>,
    Form(form): Form<ResendForm>,
) -> Response {
    let user = user.map(|Extension(u)| u);
    let ledger = match state.store.load().await {
        Ok(ledger) => ledger,
        Err(e) => return failure(&state, &e, user.as_ref()),
    };
    let options = DispatchOptions {
        send_mail: checked(&form.send_mail),
        upload_archive: checked(&form.upload_archive),
    };
    match dispatch(&state, &ledger.rows, options).await {
        Ok(report) => state.views.summary(&report, state.renderer.config(), user.as_ref()),
        Err(e) => failure(&state, &e, user.as_ref()),
    }
}

pub async fn invoice(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| (StatusCode::NOT_FOUND, format!("no statement for {date:?}")))?;
    let name = statement_file_name(&state.renderer.config().title, date);
    let pdf = tokio::fs::read(state.invoice_dir.join(&name))
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => (StatusCode::NOT_FOUND, format!("no statement {name}")),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("read error: {e}")),
        })?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, format!("inline; filename=\"{name}\"")),
        ],
        pdf,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct LedgerSnapshot {
    pub rows: Vec<Row>,
    pub totals: Totals,
}

pub async fn ledger_json(
    State(state): State<AppState>,
) -> Result<Json<LedgerSnapshot>, (StatusCode, String)> {
    let ledger = state
        .store
        .load()
        .await
        .map_err(|e| (error_status(&e), e.to_string()))?;
    let totals = ledger.totals().map_err(|e| (error_status(&e), e.to_string()))?;
    Ok(Json(LedgerSnapshot {
        rows: ledger.rows,
        totals,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_names_are_file_safe() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(statement_file_name("Autostrom", date), "Autostrom-2024-02-01.pdf");
        assert_eq!(statement_file_name("Car / Garage", date), "Car___Garage-2024-02-01.pdf");
    }

    #[test]
    fn form_dates_accept_both_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(parse_form_date("2024-02-01").unwrap(), expected);
        assert_eq!(parse_form_date("01.02.2024").unwrap(), expected);
        assert!(matches!(parse_form_date("Feb 1"), Err(Error::Validation(_))));
    }

    #[test]
    fn validation_maps_to_unprocessable() {
        assert_eq!(
            error_status(&Error::Validation("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&Error::SourceUnavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(error_status(&Error::parse(3, "x")), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn checkbox_values() {
        assert!(checked(&Some("on".into())));
        assert!(!checked(&Some("off".into())));
        assert!(!checked(&None));
    }
}
