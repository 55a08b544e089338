use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Header of the ledger file, in column order.
pub const COLUMNS: [&str; 5] = [
    "Datum",
    "Zaehlerstand",
    "Strompreis",
    "Verbrauch",
    "Abrechnung",
];
pub const SEPARATOR: char = '\t';
pub const DATE_FORMAT: &str = "%d.%m.%Y";
/// Decimal places of the price column. Finer prices would not survive a
/// write and reload.
pub const PRICE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub date: NaiveDate,
    pub meter_reading: Decimal,
    pub unit_price: Decimal,
    pub consumption: Decimal,
    pub amount_due: Decimal,
}
impl Row {
    pub fn date_label(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    /// One ledger line in the on-disk layout, without trailing newline.
    ///
    /// Readings and consumption are written without trailing zeros, prices and
    /// amounts with six decimals, matching the files the tool has always
    /// produced.
    pub fn to_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{:.6}{sep}{}{sep}{:.6}",
            self.date_label(),
            self.meter_reading.normalize(),
            self.unit_price,
            self.consumption.normalize(),
            self.amount_due,
            sep = SEPARATOR,
        )
    }
}

/// A submitted reading before derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub date: NaiveDate,
    pub meter_reading: Decimal,
    pub unit_price: Decimal,
}
impl Reading {
    pub fn new(date: NaiveDate, meter_reading: Decimal, unit_price: Decimal) -> Self {
        Self {
            date,
            meter_reading,
            unit_price,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub consumption: Decimal,
    pub amount_due: Decimal,
}
