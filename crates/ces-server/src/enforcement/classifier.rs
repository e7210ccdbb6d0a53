use std::collections::HashSet;

use ces_core::ClinicalResponse;

/// Resource types released without consent checks.
#[derive(Debug, Clone, Default)]
pub struct UnprotectedResourceTypes {
    types: HashSet<String>,
}

impl UnprotectedResourceTypes {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.types.contains(resource_type)
    }

    /// A bundle is protected when it has entries and at least one of them is
    /// not an exempt type. Entries without a resource count as protected.
    pub fn is_protected(&self, response: &ClinicalResponse) -> bool {
        match response {
            ClinicalResponse::Resource(resource) => !self.contains(resource.resource_type()),
            ClinicalResponse::Bundle(bundle) => bundle
                .entry
                .iter()
                .any(|entry| !entry.resource_type().is_some_and(|ty| self.contains(ty))),
        }
    }
}
