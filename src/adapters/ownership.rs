//! Owner references and ownership labels shared by every sub-resource builder

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::{Memcached, API_VERSION, LABEL_DATABASE_KIND, LABEL_DATABASE_NAME, RESOURCE_KIND_MEMCACHED};

/// Owner reference pointing at the database, enabling cascading deletion
pub fn owner_reference(db: &Memcached) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: RESOURCE_KIND_MEMCACHED.to_string(),
        name: db.name_any(),
        uid: db.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Add or refresh the database's owner reference, keeping foreign ones
pub fn ensure_owner_reference(meta: &mut ObjectMeta, owner: OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    match refs
        .iter_mut()
        .find(|r| r.kind == owner.kind && r.name == owner.name)
    {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
}

/// Whether an object carries the ownership labels of `db`
pub fn is_owned_by(meta: &ObjectMeta, db: &Memcached) -> bool {
    let Some(labels) = meta.labels.as_ref() else {
        return false;
    };
    labels.get(LABEL_DATABASE_KIND).map(String::as_str) == Some(RESOURCE_KIND_MEMCACHED)
        && labels.get(LABEL_DATABASE_NAME) == Some(&db.offshoot_name())
}

/// Layer the database's offshoot labels over whatever the object carries
pub fn ensure_offshoot_labels(meta: &mut ObjectMeta, db: &Memcached) {
    meta.labels
        .get_or_insert_with(Default::default)
        .extend(db.offshoot_labels());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::fixtures::memcached;
    use std::collections::BTreeMap;

    #[test]
    fn ownership_requires_both_labels() {
        let db = memcached("db1");
        let mut meta = ObjectMeta::default();
        assert!(!is_owned_by(&meta, &db));

        meta.labels = Some(BTreeMap::from([(
            LABEL_DATABASE_NAME.to_string(),
            "db1".to_string(),
        )]));
        assert!(!is_owned_by(&meta, &db));

        ensure_offshoot_labels(&mut meta, &db);
        assert!(is_owned_by(&meta, &db));
        assert!(!is_owned_by(&meta, &memcached("db2")));
    }

    #[test]
    fn owner_reference_is_not_duplicated() {
        let db = memcached("db1");
        let mut meta = ObjectMeta {
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".to_string(),
                kind: "Other".to_string(),
                name: "x".to_string(),
                uid: "u".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        ensure_owner_reference(&mut meta, owner_reference(&db));
        ensure_owner_reference(&mut meta, owner_reference(&db));

        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].uid, "db1-uid");
        assert_eq!(refs[1].controller, Some(true));
    }
}
