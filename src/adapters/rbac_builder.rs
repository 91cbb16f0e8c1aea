//! Instance-scoped RBAC objects
//!
//! Each database gets a ServiceAccount that may only `get` its own database
//! object. All three objects share the database's name.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::adapters::ownership::owner_reference;
use crate::crd::{Memcached, API_GROUP, RESOURCE_PLURAL_MEMCACHED};

fn offshoot_meta(db: &Memcached) -> ObjectMeta {
    ObjectMeta {
        name: Some(db.offshoot_name()),
        namespace: db.namespace(),
        labels: Some(db.offshoot_labels()),
        owner_references: Some(vec![owner_reference(db)]),
        ..Default::default()
    }
}

/// Role granting `get` on this database only
pub fn build_role(db: &Memcached) -> Role {
    Role {
        metadata: offshoot_meta(db),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![API_GROUP.to_string()]),
            resources: Some(vec![RESOURCE_PLURAL_MEMCACHED.to_string()]),
            resource_names: Some(vec![db.name_any()]),
            verbs: vec!["get".to_string()],
            ..Default::default()
        }]),
    }
}

/// ServiceAccount the database pods run under
pub fn build_service_account(db: &Memcached) -> ServiceAccount {
    ServiceAccount {
        metadata: offshoot_meta(db),
        ..Default::default()
    }
}

/// RoleBinding tying the Role to the ServiceAccount
pub fn build_role_binding(db: &Memcached) -> RoleBinding {
    RoleBinding {
        metadata: offshoot_meta(db),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: db.offshoot_name(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: db.offshoot_name(),
            namespace: db.namespace(),
            ..Default::default()
        }]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ownership::is_owned_by;
    use crate::crd::fixtures::memcached;

    #[test]
    fn role_grants_get_on_own_database_only() {
        let role = build_role(&memcached("db1"));
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].verbs, vec!["get"]);
        assert_eq!(rules[0].resource_names, Some(vec!["db1".to_string()]));
        assert_eq!(rules[0].resources, Some(vec!["memcacheds".to_string()]));
        assert_eq!(rules[0].api_groups, Some(vec!["kubedb.com".to_string()]));
    }

    #[test]
    fn binding_ties_role_to_service_account() {
        let db = memcached("db1");
        let binding = build_role_binding(&db);
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(binding.role_ref.name, "db1");

        let subject = &binding.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "db1");
        assert_eq!(subject.namespace.as_deref(), Some("ns"));
        assert!(is_owned_by(&binding.metadata, &db));
        assert!(is_owned_by(&build_service_account(&db).metadata, &db));
    }
}
