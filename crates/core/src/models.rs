use serde::Serialize;

/// A repository that has been provisioned on the deployment platform.
///
/// Written once and never updated; both platform identifiers are always present.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Project {
    pub repository_id: u64,
    pub repository_full_name: String,
    pub platform_project_id: String,
    pub platform_service_id: String,
}

impl Project {
    pub fn new(repository: &RepositoryRef, provisioned: ProvisionedProject) -> Self {
        Self {
            repository_id: repository.id,
            repository_full_name: repository.full_name.clone(),
            platform_project_id: provisioned.platform_project_id,
            platform_service_id: provisioned.platform_service_id,
        }
    }
}

/// A repository named by an inbound webhook event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RepositoryRef {
    pub id: u64,
    pub full_name: String,
    pub owner: String,
    pub name: String,
}

/// Identifiers returned by a complete provisioning sequence.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProvisionedProject {
    pub platform_project_id: String,
    pub platform_service_id: String,
}

/// Inputs passed to the build workflow.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInputs {
    pub owner: String,
    pub repo: String,
    pub platform_service_id: String,
    // Workflow dispatch inputs must be strings
    #[serde(serialize_with = "serialize_as_string")]
    pub repository_id: u64,
}

fn serialize_as_string<S: serde::Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_workflow_inputs_are_strings() {
        let inputs = WorkflowInputs {
            owner: "acme".to_string(),
            repo: "app".to_string(),
            platform_service_id: "s1".to_string(),
            repository_id: 42,
        };
        assert_eq!(
            serde_json::to_value(&inputs).unwrap(),
            json!({
                "owner": "acme",
                "repo": "app",
                "platformServiceId": "s1",
                "repositoryId": "42",
            })
        );
    }
}
