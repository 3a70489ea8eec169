// Schema building for ingested sources
//
// Maps the source's column types onto destination types and renames columns
// whose truncated names would collide in the destination store.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::IngestionConfig;
use crate::error::MetadataError;
use crate::models::{Column, Schema, SourceMetadata};

/// Column types published by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Checkbox,
    Double,
    FloatingTimestamp,
    CalendarDate,
    Money,
    Number,
    Text,
    Url,
    Line,
    Location,
    MultiLine,
    MultiPoint,
    MultiPolygon,
    Point,
}

impl SourceType {
    /// Case-insensitive lookup of a source type name
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "checkbox" => Some(SourceType::Checkbox),
            "double" => Some(SourceType::Double),
            "floating timestamp" => Some(SourceType::FloatingTimestamp),
            "calendar date" => Some(SourceType::CalendarDate),
            "money" => Some(SourceType::Money),
            "number" => Some(SourceType::Number),
            "text" => Some(SourceType::Text),
            "url" => Some(SourceType::Url),
            "line" => Some(SourceType::Line),
            "location" => Some(SourceType::Location),
            "multiline" => Some(SourceType::MultiLine),
            "multipoint" => Some(SourceType::MultiPoint),
            "multipolygon" => Some(SourceType::MultiPolygon),
            "point" => Some(SourceType::Point),
            _ => None,
        }
    }

    pub fn target_type(self) -> &'static str {
        match self {
            SourceType::Checkbox => "boolean",
            SourceType::Double => "double precision",
            SourceType::FloatingTimestamp => "timestamp without time zone",
            SourceType::CalendarDate => "date",
            SourceType::Money => "money",
            SourceType::Number => "numeric",
            SourceType::Text | SourceType::Url => TEXT_TYPE,
            SourceType::Line
            | SourceType::Location
            | SourceType::MultiLine
            | SourceType::MultiPoint
            | SourceType::MultiPolygon
            | SourceType::Point => "json",
        }
    }
}

const TEXT_TYPE: &str = "text";

/// Comment attached to the prepended row-identifier column
const ROW_ID_COMMENT: &str = "Socrata column ID";

/// Destination type for a source type name. Unknown types become text so an
/// unfamiliar upstream type never fails ingestion.
pub fn map_type(source_type: &str) -> &'static str {
    SourceType::parse(source_type)
        .map(SourceType::target_type)
        .unwrap_or(TEXT_TYPE)
}

/// Rename columns whose first `prefix_len` characters are shared.
///
/// Every column in a group of shared prefixes becomes `{prefix}_{NNN}`, where
/// NNN is its position within the group. Columns with a unique prefix are
/// returned untouched, even when longer than the identifier limit.
pub fn dedupe_schema(columns: &[Column], prefix_len: usize) -> Schema {
    let shorts: Vec<String> = columns
        .iter()
        .map(|column| column.name.chars().take(prefix_len).collect())
        .collect();

    let mut prefix_counts: HashMap<&str, usize> = HashMap::new();
    for short in &shorts {
        *prefix_counts.entry(short.as_str()).or_insert(0) += 1;
    }

    // Names kept as-is are reserved up front so no generated name takes them
    let mut taken: HashSet<String> = columns
        .iter()
        .zip(&shorts)
        .filter(|(_, short)| prefix_counts[short.as_str()] == 1)
        .map(|(column, _)| column.name.clone())
        .collect();

    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut result = Vec::with_capacity(columns.len());

    for (column, short) in columns.iter().zip(&shorts) {
        if prefix_counts[short.as_str()] == 1 {
            result.push(column.clone());
            continue;
        }

        let position = positions.entry(short.as_str()).or_insert(0);
        let name = loop {
            let candidate = format!("{}_{:03}", short, position);
            *position += 1;
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            warn!(column = %column.name, candidate = %candidate, "deduplicated name already in use, skipping");
        };

        debug!(from = %column.name, to = %name, "renamed column with shared prefix");
        result.push(column.renamed(name));
    }

    result
}

/// Destination schema for a source dataset.
///
/// Prepends the source's row-identifier column, maps every type and
/// deduplicates the names.
pub fn schema_from_metadata(
    metadata: &SourceMetadata,
    config: &IngestionConfig,
) -> Result<Schema, MetadataError> {
    let resource = metadata
        .resource
        .as_ref()
        .ok_or_else(|| MetadataError::InvalidSourceMetadata("missing resource".to_string()))?;

    let names = resource.columns_field_name.as_ref().ok_or_else(|| {
        MetadataError::InvalidSourceMetadata("missing columns_field_name".to_string())
    })?;
    let types = resource.columns_datatype.as_ref().ok_or_else(|| {
        MetadataError::InvalidSourceMetadata("missing columns_datatype".to_string())
    })?;

    if names.len() != types.len() {
        return Err(MetadataError::InvalidSourceMetadata(format!(
            "{} column names but {} column types",
            names.len(),
            types.len()
        )));
    }

    let descriptions = resource.columns_description.as_deref().unwrap_or(&[]);

    let mut columns = Vec::with_capacity(names.len() + 1);
    columns.push(
        Column::new(0, config.row_id_column.clone(), TEXT_TYPE)
            .with_comment(Some(ROW_ID_COMMENT.to_string())),
    );
    for (i, (name, source_type)) in names.iter().zip(types).enumerate() {
        let comment = descriptions.get(i).cloned().flatten();
        columns.push(Column::new(i + 1, name.clone(), map_type(source_type)).with_comment(comment));
    }

    Ok(dedupe_schema(&columns, config.prefix_len))
}
