use crate::error::{Result, TapError};

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fails unless this client is at least `required` (`major[.minor[.patch]]`).
pub fn ensure_compatible(required: &str) -> Result<()> {
    check(CLIENT_VERSION, required)
}

fn check(found: &str, required: &str) -> Result<()> {
    if parse(found)? < parse(required)? {
        return Err(TapError::Incompatible {
            found: found.to_string(),
            required: required.trim().to_string(),
        });
    }
    Ok(())
}

/// missing components count as zero, pre-release suffixes are ignored
fn parse(version: &str) -> Result<[u64; 3]> {
    let core = version.trim().split(['-', '+']).next().unwrap_or_default();
    let mut parts = [0u64; 3];
    let mut components = core.split('.');
    for part in parts.iter_mut() {
        if let Some(component) = components.next() {
            *part = component.parse().map_err(|_| TapError::Incompatible {
                found: CLIENT_VERSION.to_string(),
                required: format!("a version number, not `{}`", version.trim()),
            })?;
        }
    }
    if components.next().is_some() {
        return Err(TapError::Incompatible {
            found: CLIENT_VERSION.to_string(),
            required: format!("a version number, not `{}`", version.trim()),
        });
    }
    Ok(parts)
}
