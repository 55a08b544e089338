use super::datatype::*;
use crate::error::{Error, Result};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Rows shown on a statement before the newest one.
pub const STATEMENT_HISTORY: usize = 24;

pub fn header_line() -> String {
    COLUMNS.join(&SEPARATOR.to_string())
}

/// Derives consumption and amount for a new reading from the previous row.
///
/// The first entry of a ledger has nothing to compare against and is billed
/// with zero consumption. The amount is rounded half-up to cents.
pub fn derive_row(
    previous: Option<&Row>,
    date: NaiveDate,
    meter_reading: Decimal,
    unit_price: Decimal,
) -> Result<Row> {
    if meter_reading < Decimal::ZERO {
        return Err(Error::Validation(format!(
            "meter reading {meter_reading} must not be negative"
        )));
    }
    if unit_price <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "unit price {unit_price} must be greater than zero"
        )));
    }
    if unit_price.normalize().scale() > PRICE_DECIMALS {
        return Err(Error::Validation(format!(
            "unit price {unit_price} has more than {PRICE_DECIMALS} decimal places"
        )));
    }
    let consumption = match previous {
        None => Decimal::ZERO,
        Some(prev) => {
            let delta = meter_reading
                .checked_sub(prev.meter_reading)
                .ok_or_else(|| {
                    Error::Validation(format!("meter reading {meter_reading} is out of range"))
                })?;
            if delta < Decimal::ZERO {
                return Err(Error::Validation(format!(
                    "meter reading {} is below the previous reading {} from {}",
                    meter_reading.normalize(),
                    prev.meter_reading.normalize(),
                    prev.date_label(),
                )));
            }
            delta
        }
    };
    let amount = consumption.checked_mul(unit_price).ok_or_else(|| {
        Error::Validation(format!(
            "amount for consumption {} at price {} is out of range",
            consumption.normalize(),
            unit_price.normalize()
        ))
    })?;
    Ok(Row {
        date,
        meter_reading,
        unit_price,
        consumption,
        amount_due: round_currency(amount),
    })
}

pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Optional window a consumption has to fall into once a previous row exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plausibility {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}
impl Plausibility {
    pub fn new(min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self { min, max }
    }
    pub fn check(&self, row: &Row, has_previous: bool) -> Result<()> {
        if !has_previous {
            return Ok(());
        }
        let below = self.min.is_some_and(|min| row.consumption < min);
        let above = self.max.is_some_and(|max| row.consumption > max);
        if below || above {
            let min = self.min.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
            let max = self.max.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
            return Err(Error::Validation(format!(
                "consumption {} is outside the accepted range {min} to {max}, please check the input",
                row.consumption.normalize()
            )));
        }
        Ok(())
    }
}

/// The ledger as loaded: parsed rows plus the exact file text they came from.
///
/// Appending keeps the existing text untouched and adds one line, so rows
/// written by other tools keep their formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub rows: Vec<Row>,
    text: String,
}
impl Ledger {
    pub fn parse(text: &str) -> Result<Ledger> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
            .filter(|(_, l)| !l.trim().is_empty());

        let Some((_, header)) = lines.next() else {
            return Ok(Ledger {
                rows: Vec::new(),
                text: text.to_string(),
            });
        };
        let header: Vec<&str> = header
            .trim_start_matches('\u{feff}')
            .split(SEPARATOR)
            .map(str::trim)
            .collect();
        if header != COLUMNS {
            return Err(Error::Format(format!(
                "expected header {:?}, found {:?}",
                COLUMNS, header
            )));
        }

        let mut rows = Vec::new();
        for (no, line) in lines {
            rows.push(parse_line(no, line)?);
        }
        Ok(Ledger {
            rows,
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
    pub fn last(&self) -> Option<&Row> {
        self.rows.last()
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Newest first, at most `n` rows.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Row> {
        self.rows.iter().rev().take(n)
    }

    /// Refuses rows that would break ordering or were not derived from the
    /// current last row.
    pub fn check_append(&self, row: &Row) -> Result<()> {
        if let Some(last) = self.last() {
            if row.date < last.date {
                return Err(Error::Validation(format!(
                    "date {} lies before the last entry from {}",
                    row.date_label(),
                    last.date_label()
                )));
            }
        }
        let expected = derive_row(self.last(), row.date, row.meter_reading, row.unit_price)?;
        if expected.consumption != row.consumption || expected.amount_due != row.amount_due {
            return Err(Error::Validation(format!(
                "derived values for {} do not match the reading delta (expected {} / {}, got {} / {})",
                row.date_label(),
                expected.consumption.normalize(),
                expected.amount_due,
                row.consumption.normalize(),
                row.amount_due
            )));
        }
        Ok(())
    }

    /// A new ledger with `row` appended to the text and the rows. The line
    /// ending follows the existing file.
    pub fn with_row(&self, row: Row) -> Ledger {
        let eol = if self.text.contains("\r\n") { "\r\n" } else { "\n" };
        let mut text = self.text.trim_end_matches(|c| c == '\n' || c == '\r').to_string();
        if text.trim().is_empty() {
            text = header_line();
        }
        text.push_str(eol);
        text.push_str(&row.to_line());
        text.push_str(eol);

        let mut rows = self.rows.clone();
        rows.push(row);
        Ledger { rows, text }
    }

    /// Walks the stored rows and reports the first invariant violation.
    pub fn check_integrity(&self) -> Result<()> {
        for pair in self.rows.windows(2) {
            let (prev, row) = (&pair[0], &pair[1]);
            let expected = derive_row(Some(prev), row.date, row.meter_reading, row.unit_price)
                .map_err(|e| Error::Validation(format!("row {}: {e}", row.date_label())))?;
            if row.date < prev.date {
                return Err(Error::Validation(format!(
                    "row {} is dated before {}",
                    row.date_label(),
                    prev.date_label()
                )));
            }
            if expected.consumption != row.consumption {
                return Err(Error::Validation(format!(
                    "row {}: consumption {} should be {}",
                    row.date_label(),
                    row.consumption.normalize(),
                    expected.consumption.normalize()
                )));
            }
            if expected.amount_due != row.amount_due {
                return Err(Error::Validation(format!(
                    "row {}: amount {} should be {}",
                    row.date_label(),
                    row.amount_due,
                    expected.amount_due
                )));
            }
        }
        Ok(())
    }

    pub fn totals(&self) -> Result<Totals> {
        self.rows.iter().try_fold(Totals::default(), |t, r| {
            let overflow = || Error::Format(format!("totals overflow at row {}", r.date_label()));
            Ok(Totals {
                consumption: t.consumption.checked_add(r.consumption).ok_or_else(overflow)?,
                amount_due: t.amount_due.checked_add(r.amount_due).ok_or_else(overflow)?,
            })
        })
    }
}

/// The rows a statement shows: the newest row and up to
/// [`STATEMENT_HISTORY`] rows before it.
pub fn statement_window(rows: &[Row]) -> &[Row] {
    let start = rows.len().saturating_sub(STATEMENT_HISTORY + 1);
    &rows[start..]
}

fn parse_line(no: usize, line: &str) -> Result<Row> {
    let cells: Vec<&str> = line.split(SEPARATOR).map(str::trim).collect();
    if cells.len() != COLUMNS.len() {
        return Err(Error::Format(format!(
            "line {no} has {} columns, expected {}",
            cells.len(),
            COLUMNS.len()
        )));
    }
    let date = NaiveDate::parse_from_str(cells[0], DATE_FORMAT)
        .map_err(|e| Error::parse(no, format!("invalid date {:?}: {e}", cells[0])))?;
    let number = |idx: usize| {
        Decimal::from_str(cells[idx]).map_err(|_| {
            Error::parse(
                no,
                format!("{} {:?} is not a number", COLUMNS[idx], cells[idx]),
            )
        })
    };
    Ok(Row {
        date,
        meter_reading: number(1)?,
        unit_price: number(2)?,
        consumption: number(3)?,
        amount_due: number(4)?,
    })
}

/// Accepts both `0.32` and `0,32`, as typed into the form.
pub fn parse_decimal(input: &str) -> Result<Decimal> {
    let normalized = input.trim().replace(',', ".");
    Decimal::from_str(&normalized)
        .map_err(|_| Error::Validation(format!("{:?} is not a valid number", input.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::sample_data::*;

    #[test]
    fn derives_consumption_and_amount_from_previous_row() {
        let prev = row("01.01.2024", "1000", "0.30", "0", "0");
        let next = derive_row(Some(&prev), date("01.02.2024"), d("1150"), d("0.32")).unwrap();
        assert_eq!(next.consumption, d("150"));
        assert_eq!(next.amount_due, d("48.00"));
        assert_eq!(next.to_line(), "01.02.2024\t1150\t0.320000\t150\t48.000000");
    }

    #[test]
    fn first_entry_has_zero_consumption() {
        let first = derive_row(None, date("15.03.2024"), d("500"), d("0.30")).unwrap();
        assert_eq!(first.consumption, Decimal::ZERO);
        assert_eq!(first.amount_due, d("0.00"));
    }

    #[test]
    fn lower_reading_is_a_validation_error() {
        let prev = row("01.01.2024", "1000", "0.30", "0", "0");
        let err = derive_row(Some(&prev), date("01.02.2024"), d("900"), d("0.30")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("below the previous reading 1000"));
    }

    #[test]
    fn amount_rounds_half_up() {
        let prev = row("01.01.2024", "0", "0.30", "0", "0");
        // 5 * 0.321 = 1.605
        let next = derive_row(Some(&prev), date("02.01.2024"), d("5"), d("0.321")).unwrap();
        assert_eq!(next.amount_due, d("1.61"));
        // 3 * 0.335 = 1.005
        let next = derive_row(Some(&prev), date("02.01.2024"), d("3"), d("0.335")).unwrap();
        assert_eq!(next.amount_due, d("1.01"));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let err = derive_row(None, date("01.01.2024"), d("10"), Decimal::ZERO).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn parse_reads_rows_in_file_order() {
        let ledger = Ledger::parse(SAMPLE_TSV).unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.rows[0].date_label(), "01.01.2024");
        assert_eq!(ledger.last().unwrap().meter_reading, d("1300"));
        assert_eq!(ledger.text(), SAMPLE_TSV);
        ledger.check_integrity().unwrap();
    }

    #[test]
    fn empty_text_is_an_empty_ledger() {
        let ledger = Ledger::parse("").unwrap();
        assert!(ledger.is_empty());
        let ledger = Ledger::parse("\n\n").unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn header_only_file_is_an_empty_ledger() {
        let ledger = Ledger::parse(&format!("{}\n", header_line())).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn wrong_header_is_a_format_error() {
        let err = Ledger::parse("Datum\tZaehlerstand\tStrompreis\n").unwrap_err();
        assert!(matches!(err, Error::Format(_)));

        let reordered = "Datum\tStrompreis\tZaehlerstand\tVerbrauch\tAbrechnung\n";
        assert!(matches!(Ledger::parse(reordered), Err(Error::Format(_))));

        let commas = "Datum,Zaehlerstand,Strompreis,Verbrauch,Abrechnung\n";
        assert!(matches!(Ledger::parse(commas), Err(Error::Format(_))));
    }

    #[test]
    fn short_row_is_a_format_error() {
        let text = format!("{}\n01.01.2024\t1000\t0.30\n", header_line());
        let err = Ledger::parse(&text).unwrap_err();
        assert!(matches!(err, Error::Format(ref m) if m.contains("line 2")));
    }

    #[test]
    fn malformed_fields_are_parse_errors() {
        let text = format!("{}\n2024-01-01\t1000\t0.30\t0\t0\n", header_line());
        assert!(matches!(
            Ledger::parse(&text),
            Err(Error::Parse { line: 2, .. })
        ));

        let text = format!("{}\n01.01.2024\t1000\tabc\t0\t0\n", header_line());
        let err = Ledger::parse(&text).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
        assert!(err.to_string().contains("Strompreis"));
    }

    #[test]
    fn crlf_files_parse() {
        let text = SAMPLE_TSV.replace('\n', "\r\n");
        let ledger = Ledger::parse(&text).unwrap();
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn with_row_keeps_existing_text_and_adds_one_line() {
        let ledger = Ledger::parse(SAMPLE_TSV).unwrap();
        let next = derive_row(ledger.last(), date("01.04.2024"), d("1410"), d("0.32")).unwrap();
        ledger.check_append(&next).unwrap();
        let appended = ledger.with_row(next);
        assert!(appended.text().starts_with(SAMPLE_TSV));
        assert_eq!(
            &appended.text()[SAMPLE_TSV.len()..],
            "01.04.2024\t1410\t0.320000\t110\t35.200000\n"
        );
        assert_eq!(Ledger::parse(appended.text()).unwrap(), appended);
    }

    #[test]
    fn with_row_on_empty_ledger_writes_header() {
        let first = derive_row(None, date("01.01.2024"), d("500"), d("0.30")).unwrap();
        let ledger = Ledger::default().with_row(first);
        assert_eq!(
            ledger.text(),
            "Datum\tZaehlerstand\tStrompreis\tVerbrauch\tAbrechnung\n01.01.2024\t500\t0.300000\t0\t0.000000\n"
        );
    }

    #[test]
    fn check_append_rejects_hand_made_rows() {
        let ledger = Ledger::parse(SAMPLE_TSV).unwrap();
        let mut forged = derive_row(ledger.last(), date("01.04.2024"), d("1410"), d("0.32")).unwrap();
        forged.amount_due = d("1.00");
        assert!(matches!(ledger.check_append(&forged), Err(Error::Validation(_))));

        let backdated = derive_row(ledger.last(), date("01.01.2023"), d("1410"), d("0.32")).unwrap();
        assert!(matches!(ledger.check_append(&backdated), Err(Error::Validation(_))));
    }

    #[test]
    fn plausibility_window_applies_after_first_row() {
        let window = Plausibility::new(Some(d("10")), Some(d("2000")));
        let prev = row("01.01.2024", "1000", "0.30", "0", "0");
        let tiny = derive_row(Some(&prev), date("02.01.2024"), d("1005"), d("0.30")).unwrap();
        let err = window.check(&tiny, true).unwrap_err();
        assert!(err.to_string().contains("10 to 2000"));

        let huge = derive_row(Some(&prev), date("02.01.2024"), d("5000"), d("0.30")).unwrap();
        assert!(window.check(&huge, true).is_err());

        let ok = derive_row(Some(&prev), date("02.01.2024"), d("1100"), d("0.30")).unwrap();
        window.check(&ok, true).unwrap();

        let first = derive_row(None, date("01.01.2024"), d("5"), d("0.30")).unwrap();
        window.check(&first, false).unwrap();
        Plausibility::default().check(&tiny, true).unwrap();
    }

    #[test]
    fn integrity_check_flags_wrong_consumption() {
        let text = format!(
            "{}\n01.01.2024\t1000\t0.30\t0\t0\n01.02.2024\t1150\t0.32\t100\t32\n",
            header_line()
        );
        let err = Ledger::parse(&text).unwrap().check_integrity().unwrap_err();
        assert!(err.to_string().contains("consumption 100 should be 150"));
    }

    #[test]
    fn statement_window_keeps_last_twenty_five_rows() {
        let rows = monthly_rows(30);
        let window = statement_window(&rows);
        assert_eq!(window.len(), STATEMENT_HISTORY + 1);
        assert_eq!(window.last(), rows.last());
        assert_eq!(window[0], rows[5]);

        let few = monthly_rows(3);
        assert_eq!(statement_window(&few).len(), 3);
    }

    #[test]
    fn recent_is_newest_first() {
        let ledger = Ledger::parse(SAMPLE_TSV).unwrap();
        let dates: Vec<String> = ledger.recent(2).map(|r| r.date_label()).collect();
        assert_eq!(dates, vec!["01.03.2024", "01.02.2024"]);
    }

    #[test]
    fn totals_sum_consumption_and_amount() {
        let totals = Ledger::parse(SAMPLE_TSV).unwrap().totals().unwrap();
        assert_eq!(totals.consumption, d("300"));
        assert_eq!(totals.amount_due, d("96.00"));
    }

    #[test]
    fn totals_overflow_is_a_format_error() {
        let huge = Decimal::MAX.to_string();
        let ledger = Ledger {
            rows: vec![
                row("01.01.2024", "0", "0.30", &huge, "1"),
                row("01.02.2024", "0", "0.30", &huge, "1"),
            ],
            text: String::new(),
        };
        assert!(matches!(ledger.totals(), Err(Error::Format(_))));
    }

    #[test]
    fn out_of_range_amount_is_a_validation_error() {
        let prev = row("01.01.2024", "0", "0.30", "0", "0");
        let err = derive_row(Some(&prev), date("01.02.2024"), Decimal::MAX, d("2")).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("out of range")));

        let negative = row("01.01.2024", &Decimal::MIN.to_string(), "0.30", "0", "0");
        let err = derive_row(Some(&negative), date("01.02.2024"), Decimal::MAX, d("2")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn price_keeps_six_decimals_through_a_reload() {
        let prev = row("01.01.2024", "0", "0.30", "0", "0");
        let err = derive_row(Some(&prev), date("01.02.2024"), d("100000"), d("0.1234565"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("6 decimal places")));

        // Trailing zeros do not count.
        derive_row(Some(&prev), date("01.02.2024"), d("100000"), d("0.12345600")).unwrap();

        let first = derive_row(None, date("01.01.2024"), d("0"), d("0.30")).unwrap();
        let next = derive_row(Some(&first), date("01.02.2024"), d("100000"), d("0.123456")).unwrap();
        let written = Ledger::default().with_row(first).with_row(next);
        let reloaded = Ledger::parse(written.text()).unwrap();
        assert_eq!(reloaded, written);
        reloaded.check_integrity().unwrap();
        assert_eq!(reloaded.last().unwrap().amount_due, d("12345.60"));
    }

    #[test]
    fn with_row_keeps_crlf_line_endings() {
        let text = SAMPLE_TSV.replace('\n', "\r\n");
        let ledger = Ledger::parse(&text).unwrap();
        let next = derive_row(ledger.last(), date("01.04.2024"), d("1410"), d("0.32")).unwrap();
        let appended = ledger.with_row(next);
        assert!(appended.text().starts_with(&text));
        assert_eq!(
            &appended.text()[text.len()..],
            "01.04.2024\t1410\t0.320000\t110\t35.200000\r\n"
        );
        assert_eq!(appended.text().matches('\n').count(), appended.text().matches("\r\n").count());
        assert_eq!(Ledger::parse(appended.text()).unwrap().len(), 4);
    }

    #[test]
    fn form_numbers_accept_decimal_comma() {
        assert_eq!(parse_decimal("0,32").unwrap(), d("0.32"));
        assert_eq!(parse_decimal(" 1150 ").unwrap(), d("1150"));
        assert!(matches!(parse_decimal("12a"), Err(Error::Validation(_))));
    }
}
