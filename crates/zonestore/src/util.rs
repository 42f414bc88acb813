//! Small domain-name helpers shared across this crate.

use bytes::BytesMut;
use domain::base::name::NameBuilder;

use crate::StoredName;

/// The immediate parent of `name`, or `None` if `name` is already the root.
///
/// Built by re-assembling all labels but the leftmost one, rather than via
/// an inherent `parent()` method, so that this crate doesn't depend on a
/// specific method being present on every `domain` release.
pub fn name_parent(name: &StoredName) -> Option<StoredName> {
    if name.is_root() {
        return None;
    }

    let mut builder = NameBuilder::<BytesMut>::new();
    let mut labels = name.iter_labels();
    labels.next();
    for label in labels {
        builder
            .append_label(label.as_ref())
            .expect("a suffix of a valid name is itself a valid name");
    }
    Some(
        builder
            .finish()
            .expect("a suffix of a valid name forms a complete name"),
    )
}
