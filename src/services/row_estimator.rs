use std::collections::HashMap;

use crate::config::IngestionConfig;
use crate::models::{RowEstimate, SourceStatistics};

/// Sizes a remote scan from the statistics the source publishes.
///
/// Qualifiers are not taken into account; they are pushed down to the
/// source as-is.
pub struct RowEstimator {
    default_column_width: u64,
    row_id_column: String,
    row_id_width: u64,
}

impl RowEstimator {
    pub fn new(config: &IngestionConfig) -> Self {
        Self {
            default_column_width: config.default_column_width,
            row_id_column: config.row_id_column.clone(),
            row_id_width: config.row_id_width,
        }
    }

    /// Row count comes from the first column's null and non-null counts.
    /// Sums saturate: the statistics are published by the source.
    /// The row identifier is never measured by the source, so it gets a
    /// fixed width (`row-XXXX.XXXX_XXXX`).
    pub fn estimate(&self, requested_columns: &[String], stats: &SourceStatistics) -> RowEstimate {
        let row_count = stats
            .columns
            .first()
            .and_then(|column| column.cached_contents.as_ref())
            .map(|contents| contents.non_null.saturating_add(contents.null))
            .unwrap_or(0);

        let widths: HashMap<&str, u64> = stats
            .columns
            .iter()
            .filter_map(|column| column.width.map(|width| (column.field_name.as_str(), width)))
            .collect();

        let avg_row_width = requested_columns
            .iter()
            .map(|column| {
                if *column == self.row_id_column {
                    self.row_id_width
                } else {
                    widths
                        .get(column.as_str())
                        .copied()
                        .unwrap_or(self.default_column_width)
                }
            })
            .fold(0u64, u64::saturating_add);

        RowEstimate {
            row_count,
            avg_row_width,
        }
    }
}

impl Default for RowEstimator {
    fn default() -> Self {
        Self::new(&IngestionConfig::default())
    }
}
