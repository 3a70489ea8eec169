use serde::{Deserialize, Deserializer, Serialize};

/// Dataset metadata as published by the source's views endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub resource: Option<ResourceMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub columns_field_name: Option<Vec<String>>,
    pub columns_datatype: Option<Vec<String>>,
    pub columns_description: Option<Vec<Option<String>>>,
}

/// Per-column statistics the source reports alongside a dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStatistics {
    #[serde(default)]
    pub columns: Vec<ColumnStatistics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    #[serde(rename = "fieldName")]
    pub field_name: String,
    #[serde(default)]
    pub width: Option<u64>,
    #[serde(rename = "cachedContents", default)]
    pub cached_contents: Option<CachedContents>,
}

/// Counts are published as decimal strings, sometimes as numbers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedContents {
    #[serde(default, deserialize_with = "count_from_str_or_int")]
    pub non_null: u64,
    #[serde(default, deserialize_with = "count_from_str_or_int")]
    pub null: u64,
}

/// Expected size of a scan, fed to the upstream planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowEstimate {
    pub row_count: u64,
    pub avg_row_width: u64,
}

fn count_from_str_or_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse::<u64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_deserialization() {
        let stats: SourceStatistics = serde_json::from_str(
            r#"{"columns": [
                {"fieldName": "a", "width": 40, "cachedContents": {"non_null": "90", "null": 10}},
                {"fieldName": "b"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(stats.columns.len(), 2);
        let contents = stats.columns[0].cached_contents.as_ref().unwrap();
        assert_eq!(contents.non_null, 90);
        assert_eq!(contents.null, 10);
        assert_eq!(stats.columns[1].width, None);
    }

    #[test]
    fn test_metadata_without_descriptions() {
        let metadata: SourceMetadata = serde_json::from_str(
            r#"{"resource": {"columns_field_name": ["a"], "columns_datatype": ["Number"]}}"#,
        )
        .unwrap();
        let resource = metadata.resource.unwrap();
        assert!(resource.columns_description.is_none());
    }
}
