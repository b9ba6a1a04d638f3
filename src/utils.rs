use std::{
    hash::BuildHasherDefault,
    time::{SystemTime, UNIX_EPOCH},
};

use twox_hash::XxHash64;

/// Hasher used for label signature tables. Signatures are short strings built
/// from trusted schema keys, so a fast non-keyed hash is fine here.
pub(crate) type LabelHasher = BuildHasherDefault<XxHash64>;

/// Current wall clock time as whole seconds since the unix epoch.
pub(crate) fn unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
