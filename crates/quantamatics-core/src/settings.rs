//! Static enumerations shared by entities and panels.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Symbology namespaces understood by the instrument endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SymbologyType {
    Bloomberg,
    #[default]
    Facteus,
    #[serde(rename = "ISIN")]
    Isin,
    #[serde(rename = "CapIQ")]
    CapIq,
}

impl SymbologyType {
    pub const ALL: [Self; 4] = [Self::Bloomberg, Self::Facteus, Self::Isin, Self::CapIq];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bloomberg => "Bloomberg",
            Self::Facteus => "Facteus",
            Self::Isin => "ISIN",
            Self::CapIq => "CapIQ",
        }
    }
}

impl Display for SymbologyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbologyType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown symbology type '{value}'"))
    }
}

/// Statement families a KPI can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinancialStatementType {
    IncomeStatement,
    CashFlow,
    BalanceSheet,
    Other,
}

impl FinancialStatementType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncomeStatement => "Income Statement",
            Self::CashFlow => "Cash Flow",
            Self::BalanceSheet => "Balance Sheet",
            Self::Other => "Other",
        }
    }
}

impl Display for FinancialStatementType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Panel dataset families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetType {
    ConsumerCardPayments,
}

impl DatasetType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConsumerCardPayments => "Consumer Card Payments",
        }
    }
}

impl Display for DatasetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbology_round_trips_through_its_wire_name() {
        for kind in SymbologyType::ALL {
            assert_eq!(kind.as_str().parse::<SymbologyType>(), Ok(kind));
        }
        assert_eq!("isin".parse::<SymbologyType>(), Ok(SymbologyType::Isin));
        assert_eq!(SymbologyType::default(), SymbologyType::Facteus);
    }

    #[test]
    fn statement_and_dataset_names_match_the_api() {
        assert_eq!(FinancialStatementType::CashFlow.to_string(), "Cash Flow");
        assert_eq!(
            DatasetType::ConsumerCardPayments.to_string(),
            "Consumer Card Payments"
        );
    }
}
