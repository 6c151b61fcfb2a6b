//! Field allow-list resolution

use accel_core::{FieldId, DEFAULT_FIELDS};
use std::path::Path;
use tracing::{info, warn};

/// Managed field set from the configured names or file
///
/// Names take precedence over the file. An unreadable file falls back to the
/// default set. Names must match the upper-case canonical name exactly.
/// Unknown names are skipped with a warning, so an allow-list with no valid
/// name yields an empty set.
pub fn managed_fields(names: Option<&[String]>, file: Option<&Path>) -> Vec<FieldId> {
    if let Some(names) = names {
        return parse_names(names.iter().map(String::as_str));
    }

    if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => return parse_names(content.lines()),
            Err(e) => warn!(
                "Failed to read fields file {}: {}; using the default fields",
                path.display(),
                e
            ),
        }
    }

    DEFAULT_FIELDS.to_vec()
}

fn parse_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<FieldId> {
    let mut fields = Vec::new();
    for name in names.map(str::trim).filter(|name| !name.is_empty()) {
        match FieldId::from_name(name) {
            Some(field) if !fields.contains(&field) => fields.push(field),
            Some(_) => {}
            None => warn!("Invalid field '{}' will be ignored", name),
        }
    }

    if fields.is_empty() {
        warn!("No valid field in the allow-list; no series will be exported");
    } else {
        info!("Field allow-list: {:?}", fields.iter().map(|f| f.name()).collect::<Vec<_>>());
    }
    fields
}
