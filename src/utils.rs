use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{ResourceExt, api::ObjectMeta};
use regex::Regex;

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("static pattern"));

/// Converts a hostname or path into an RFC 1123 compatible segment for
/// generated resource names. Wildcards and slashes collapse to dashes.
pub fn sanitize_hostname(host: &str) -> String {
    let lowered = host.to_lowercase();
    let cleaned = INVALID_NAME_CHARS.replace_all(&lowered, "-");
    cleaned.trim_matches('-').chars().take(63).collect()
}

pub trait ObjectMetaAnnogateExt: Default {
    fn add_owner<T>(&mut self, owner: &T)
    where
        T: kube::Resource<DynamicType = ()>,
        T::DynamicType: Eq + std::hash::Hash + Clone;
}

impl ObjectMetaAnnogateExt for ObjectMeta {
    fn add_owner<T>(&mut self, owner: &T)
    where
        T: kube::Resource<DynamicType = ()>,
        T::DynamicType: Eq + std::hash::Hash + Clone,
    {
        let mut owners = self.owner_references.take().unwrap_or_default();

        let owner = OwnerReference {
            api_version: String::from(T::api_version(&())),
            kind: String::from(T::kind(&())),
            name: owner.name_any(),
            uid: String::from(owner.meta().uid.as_ref().unwrap()),
            controller: None,
            block_owner_deletion: Some(false),
        };
        if owners.iter().any(|o| o.uid == owner.uid) {
            // already present
            self.owner_references = Some(owners);
            return;
        }
        owners.push(owner);
        self.owner_references = Some(owners);
    }
}
