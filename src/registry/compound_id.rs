//! Deterministic, URL-safe identifiers for registry objects.
//!
//! An id is the JSON array of an object's type tag followed by the names on
//! its path from the top of the hierarchy, base64url-encoded without padding.
//! Ids survive remove + re-add of the same name; staleness is caught by the
//! page token fingerprint instead.

use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

const MAX_ID_LEN: usize = 2048;

/// Encode the given parts into an opaque id.
pub fn encode<S: AsRef<str>>(parts: &[S]) -> String {
    let parts: Vec<&str> = parts.iter().map(AsRef::as_ref).collect();
    // Serializing a slice of strings cannot fail.
    let json = serde_json::to_vec(&parts).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Split an id back into its parts. Anything malformed is reported as
/// `NotFound`, since no object can carry such an id.
pub fn decode(id: &str) -> Result<Vec<String>> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(Error::NotFound(format!("no object with id {:?}", id)));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(id)
        .map_err(|_| Error::NotFound(format!("no object with id {:?}", id)))?;
    serde_json::from_slice::<Vec<String>>(&bytes)
        .map_err(|_| Error::NotFound(format!("no object with id {:?}", id)))
}

/// Id of an unregistered child (call set, read group, record) of `parent_id`.
pub fn child(tag: &str, parent_id: &str, names: &[&str]) -> Result<String> {
    let mut parts = vec![tag.to_string()];
    parts.extend(decode(parent_id)?.into_iter().skip(1));
    parts.extend(names.iter().map(|n| n.to_string()));
    Ok(encode(&parts))
}

/// Split a child id made by [`child`] with one trailing name into the
/// parent id (re-tagged with `parent_tag`) and that name.
pub fn split_child(id: &str, tag: &str, parent_tag: &str) -> Result<(String, String)> {
    let (parent, mut names) = split_child_names(id, tag, parent_tag, 1)?;
    Ok((parent, names.pop().unwrap_or_default()))
}

/// Like [`split_child`], for ids carrying `count` trailing names.
pub fn split_child_names(
    id: &str,
    tag: &str,
    parent_tag: &str,
    count: usize,
) -> Result<(String, Vec<String>)> {
    let mut parts = decode(id)?;
    if parts.len() < count + 2 || parts[0] != tag {
        return Err(Error::NotFound(format!("no object with id {:?}", id)));
    }
    let names = parts.split_off(parts.len() - count);
    parts[0] = parent_tag.to_string();
    Ok((encode(&parts), names))
}
