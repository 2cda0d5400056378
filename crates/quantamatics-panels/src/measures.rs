//! Measure transforms and their application to panel tables.
//!
//! A transform builds a polars aggregation expression over the rows of one
//! group. Sums and means skip missing values. Ratios with a zero or missing
//! denominator are missing rather than infinite.

use polars::prelude::*;
use quantamatics_core::{QmcError, Table};
use thiserror::Error;

use crate::mapping::{MeasureStage, PanelMapping};

const ROW_INDEX: &str = "__row_index";

/// Why a single measure could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeasureError {
    #[error("column '{0}' is not present")]
    MissingColumn(String),

    #[error("column '{column}' is not numeric ({dtype})")]
    NonNumeric { column: String, dtype: String },

    #[error("no {} transform is registered", .stage.as_str())]
    MissingTransform { stage: MeasureStage },
}

/// Columns available to a transform. Lookups check presence and type so a
/// bad measure is skipped before the query runs.
#[derive(Debug, Clone, Copy)]
pub struct MeasureInputs<'a> {
    frame: &'a DataFrame,
}

impl<'a> MeasureInputs<'a> {
    pub fn new(frame: &'a DataFrame) -> Self {
        Self { frame }
    }

    /// Numeric column `name` as a float expression.
    pub fn column(&self, name: &str) -> Result<Expr, MeasureError> {
        let series = self
            .frame
            .column(name)
            .map_err(|_| MeasureError::MissingColumn(name.to_owned()))?;
        let dtype = series.dtype();
        if !dtype.is_numeric() && *dtype != DataType::Null {
            return Err(MeasureError::NonNumeric {
                column: name.to_owned(),
                dtype: dtype.to_string(),
            });
        }
        Ok(col(name).cast(DataType::Float64))
    }

    pub fn sum(&self, name: &str) -> Result<Expr, MeasureError> {
        Ok(self.column(name)?.sum())
    }

    pub fn mean(&self, name: &str) -> Result<Expr, MeasureError> {
        Ok(self.column(name)?.mean())
    }

    /// Mean ignoring zero cells.
    pub fn mean_nonzero(&self, name: &str) -> Result<Expr, MeasureError> {
        let values = self.column(name)?;
        Ok(values.clone().filter(values.neq(lit(0.0))).mean())
    }

    /// Mean of the per-row ratio `numerator / denominator`, skipping rows
    /// whose denominator is zero or missing.
    pub fn mean_ratio(&self, numerator: &str, denominator: &str) -> Result<Expr, MeasureError> {
        let top = self.column(numerator)?;
        let bottom = self.column(denominator)?;
        Ok((top / bottom.clone()).filter(bottom.neq(lit(0.0))).mean())
    }
}

/// `numerator / denominator`. Infinite and NaN results are turned into
/// missing values once the measures are computed.
pub fn divide(numerator: Expr, denominator: Expr) -> Expr {
    numerator / denominator
}

/// A measure left out of a result, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMeasure {
    pub name: String,
    pub reason: MeasureError,
}

/// Partial-failure result of applying a mapping's measures.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureOutcome {
    /// Requested dimensions first, then computed measures in declaration order.
    pub table: Table,
    pub computed: Vec<String>,
    pub skipped: Vec<SkippedMeasure>,
}

impl MeasureOutcome {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Applies every measure of `mapping` at `stage`.
///
/// Row-wise (`as_aggregate == false`) each input row yields one output row.
/// Aggregated, the input collapses to one row, or to one row per distinct
/// combination of `dimensions` (sorted by those values). A measure whose
/// transform fails is dropped from the output and listed in
/// [`MeasureOutcome::skipped`].
pub fn apply_measures(
    mapping: &PanelMapping,
    data: &Table,
    dimensions: &[String],
    stage: MeasureStage,
    as_aggregate: bool,
) -> Result<MeasureOutcome, QmcError> {
    for dimension in dimensions {
        if !data.has_column(dimension) {
            return Err(QmcError::data(format!(
                "Panel data does not have {dimension} column"
            )));
        }
    }

    let inputs = MeasureInputs::new(data.frame());
    let mut expressions = Vec::new();
    let mut computed = Vec::new();
    let mut skipped = Vec::new();

    for spec in &mapping.measures {
        let expression = mapping
            .registry
            .lookup(&spec.name, stage)
            .and_then(|transform| transform(&inputs));

        match expression {
            Ok(expression) => {
                expressions.push(expression.cast(DataType::Float64).alias(&spec.name));
                computed.push(spec.name.clone());
            }
            Err(reason) => {
                tracing::debug!(measure = %spec.name, %reason, "failed to process measure");
                skipped.push(SkippedMeasure {
                    name: spec.name.clone(),
                    reason,
                });
            }
        }
    }

    let table = if expressions.is_empty() && dimensions.is_empty() {
        Table::new()
    } else {
        let keys = dimensions.iter().map(|name| col(name)).collect::<Vec<_>>();
        let frame = if !as_aggregate {
            let mut indexed = data.frame().clone();
            let rows = (0..data.row_count() as u32).collect::<Vec<_>>();
            indexed.with_column(Series::new(ROW_INDEX, rows))?;
            let mut by_row = vec![col(ROW_INDEX)];
            by_row.extend(keys);
            indexed
                .lazy()
                .group_by_stable(by_row)
                .agg(expressions)
                .collect()?
                .drop(ROW_INDEX)?
        } else if dimensions.is_empty() {
            data.frame().clone().lazy().select(expressions).collect()?
        } else {
            data.frame()
                .clone()
                .lazy()
                .group_by_stable(keys)
                .agg(expressions)
                .collect()?
        };

        let mut table = Table::from(frame);
        if as_aggregate {
            table = table.sort_by(dimensions)?;
        }
        for name in &computed {
            table.push_series(finite_only(&table, name)?)?;
        }
        table
    };

    Ok(MeasureOutcome {
        table,
        computed,
        skipped,
    })
}

fn finite_only(table: &Table, name: &str) -> Result<Series, QmcError> {
    let values = table
        .column(name)
        .ok_or_else(|| QmcError::data(format!("measure '{name}' missing from result")))?
        .f64()?
        .into_iter()
        .map(|value| value.filter(|number| number.is_finite()))
        .collect::<Vec<_>>();
    Ok(Series::new(name, values))
}

/// Transforms of the consumer card summary family.
pub mod card_summary {
    use polars::prelude::Expr;

    use super::{divide, MeasureError, MeasureInputs};

    pub fn spend(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        inputs.sum("Spend")
    }

    pub fn transaction_count(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        inputs.sum("Transaction Count")
    }

    pub fn cardholder_count(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        inputs.mean("Cardholder Count")
    }

    /// Cardholders implied by transactions and transactions per card.
    pub fn cardholder_count_aggregate(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        Ok(divide(
            inputs.sum("Transaction Count")?,
            inputs.mean_nonzero("Transactions per Card")?,
        ))
    }

    pub fn spend_per_transaction(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        Ok(divide(inputs.sum("Spend")?, inputs.sum("Transaction Count")?))
    }

    pub fn transactions_per_card(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        inputs.mean_ratio("Transaction Count", "Cardholder Count")
    }

    pub fn transactions_per_card_aggregate(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        inputs.mean("Transactions per Card")
    }

    pub fn spend_per_card(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        inputs.mean_ratio("Spend", "Cardholder Count")
    }

    pub fn spend_per_card_aggregate(inputs: &MeasureInputs<'_>) -> Result<Expr, MeasureError> {
        Ok(divide(inputs.sum("Spend")?, cardholder_count_aggregate(inputs)?))
    }
}

#[cfg(test)]
mod tests {
    use quantamatics_core::{Column, Value};

    use super::*;
    use crate::mapping::{MeasureFunctions, MeasureSpec};

    fn sample() -> Table {
        Table::from_columns(vec![
            Column::new("Card Type", vec!["credit".into(), "debit".into(), "credit".into()]),
            Column::new("Spend", vec![Value::Float(100.0), Value::Float(50.0), Value::Float(20.0)]),
            Column::new("Transaction Count", vec![Value::Int(10), Value::Int(5), Value::Int(0)]),
            Column::new("Cardholder Count", vec![Value::Int(4), Value::Null, Value::Int(0)]),
        ])
        .expect("valid table")
    }

    fn mapping() -> PanelMapping {
        PanelMapping::new()
            .with_measure(
                MeasureSpec::fetched("Spend", "spend", "normalized spend", "spend"),
                MeasureFunctions::both(card_summary::spend, card_summary::spend),
            )
            .with_measure(
                MeasureSpec::derived("Spend per Transaction"),
                MeasureFunctions::both(
                    card_summary::spend_per_transaction,
                    card_summary::spend_per_transaction,
                ),
            )
            .with_measure(
                MeasureSpec::derived("Brand Share"),
                MeasureFunctions::both(
                    |inputs| inputs.sum("Brand Spend"),
                    |inputs| inputs.sum("Brand Spend"),
                ),
            )
    }

    fn evaluate(table: &Table, expression: Expr) -> Value {
        let frame = table
            .frame()
            .clone()
            .lazy()
            .select([expression.alias("out")])
            .collect()
            .expect("evaluates");
        Table::from(frame).value(0, "out").unwrap_or(Value::Null)
    }

    #[test]
    fn statistics_skip_missing_values_and_zero_denominators() {
        let table = sample();
        let inputs = MeasureInputs::new(table.frame());
        let expression = |built: Result<Expr, MeasureError>| built.expect("numeric columns");

        assert_eq!(evaluate(&table, expression(inputs.sum("Spend"))), Value::Float(170.0));
        assert_eq!(evaluate(&table, expression(inputs.mean("Cardholder Count"))), Value::Float(2.0));
        assert_eq!(
            evaluate(&table, expression(inputs.mean_nonzero("Cardholder Count"))),
            Value::Float(4.0)
        );
        assert_eq!(
            evaluate(&table, expression(inputs.mean_ratio("Spend", "Cardholder Count"))),
            Value::Float(25.0)
        );
        assert!(matches!(
            inputs.sum("Card Type"),
            Err(MeasureError::NonNumeric { column, .. }) if column == "Card Type"
        ));
    }

    #[test]
    fn failing_measure_is_absent_while_others_survive() {
        let outcome = apply_measures(
            &mapping(),
            &sample(),
            &[String::from("Card Type")],
            MeasureStage::PreProcess,
            false,
        )
        .expect("applies");

        assert_eq!(
            outcome.table.column_names(),
            vec!["Card Type", "Spend", "Spend per Transaction"]
        );
        assert_eq!(outcome.table.row_count(), 3);
        assert_eq!(outcome.computed, vec!["Spend", "Spend per Transaction"]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].name, "Brand Share");
        assert_eq!(
            outcome.skipped[0].reason,
            MeasureError::MissingColumn(String::from("Brand Spend"))
        );
        // Zero transactions give a missing ratio, not infinity.
        assert_eq!(outcome.table.value(2, "Spend per Transaction"), Some(Value::Null));
        assert_eq!(outcome.table.value(1, "Spend per Transaction"), Some(Value::Float(10.0)));
    }

    #[test]
    fn aggregate_with_dimensions_groups_by_their_values() {
        let outcome = apply_measures(
            &mapping(),
            &sample(),
            &[String::from("Card Type")],
            MeasureStage::Aggregate,
            true,
        )
        .expect("applies");

        assert_eq!(outcome.table.row_count(), 2);
        assert_eq!(outcome.table.value(0, "Card Type"), Some(Value::from("credit")));
        assert_eq!(outcome.table.value(0, "Spend"), Some(Value::Float(120.0)));
        assert_eq!(outcome.table.value(1, "Spend"), Some(Value::Float(50.0)));
    }

    #[test]
    fn aggregate_without_dimensions_collapses_to_one_row() {
        let outcome = apply_measures(&mapping(), &sample(), &[], MeasureStage::Aggregate, true)
            .expect("applies");

        assert_eq!(outcome.table.row_count(), 1);
        assert_eq!(outcome.table.value(0, "Spend"), Some(Value::Float(170.0)));
        assert_eq!(
            outcome.table.value(0, "Spend per Transaction"),
            Some(Value::Float(170.0 / 15.0))
        );
    }

    #[test]
    fn missing_dimension_column_is_an_error() {
        let error = apply_measures(
            &mapping(),
            &sample(),
            &[String::from("Region")],
            MeasureStage::Aggregate,
            true,
        )
        .expect_err("Region is absent");

        assert_eq!(error.kind(), quantamatics_core::ErrorKind::Data);
    }
}
