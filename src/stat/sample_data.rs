use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::datatype::{Row, DATE_FORMAT};
use super::ledger::derive_row;

pub const SAMPLE_TSV: &str = "Datum\tZaehlerstand\tStrompreis\tVerbrauch\tAbrechnung\n\
01.01.2024\t1000\t0.300000\t0\t0.000000\n\
01.02.2024\t1150\t0.320000\t150\t48.000000\n\
01.03.2024\t1300\t0.320000\t150\t48.000000\n";

pub fn d(v: &str) -> Decimal {
    Decimal::from_str(v).unwrap()
}

pub fn date(v: &str) -> NaiveDate {
    NaiveDate::parse_from_str(v, DATE_FORMAT).unwrap()
}

pub fn row(day: &str, reading: &str, price: &str, consumption: &str, amount: &str) -> Row {
    Row {
        date: date(day),
        meter_reading: d(reading),
        unit_price: d(price),
        consumption: d(consumption),
        amount_due: d(amount),
    }
}

/// `n` consistent rows, one per month from January 2020, 120 units apart.
pub fn monthly_rows(n: usize) -> Vec<Row> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let mut rows: Vec<Row> = Vec::with_capacity(n);
    for i in 0..n {
        let day = start + Months::new(i as u32);
        let reading = Decimal::from(1000 + 120 * i as i64);
        let next = derive_row(rows.last(), day, reading, d("0.31")).unwrap();
        rows.push(next);
    }
    rows
}
