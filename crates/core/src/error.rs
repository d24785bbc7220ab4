use thiserror::Error;

/// Failures of webhook processing, per request or per repository.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Missing or invalid `X-Hub-Signature-256`.
    #[error("webhook signature verification failed")]
    AuthenticationFailure,

    /// The body of an actionable event could not be understood.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// The platform project was created but its service was not.
    ///
    /// `compensated` is true when the orphaned project has been deleted again.
    #[error(
        "service creation failed after creating platform project {platform_project_id} \
         (compensated: {compensated}): {message}"
    )]
    PartialProvisioningFailure { platform_project_id: String, compensated: bool, message: String },

    #[error("build workflow {0} not found")]
    WorkflowNotFound(String),

    #[error("failed to dispatch build workflow: {0}")]
    DispatchFailure(String),

    /// Timeouts, 5xx responses and transport errors from remote APIs.
    #[error("{operation} failed transiently: {message}")]
    TransientExternalFailure { operation: &'static str, message: String },

    /// A remote API rejected the request outright.
    #[error("{operation} was rejected: {message}")]
    ExternalFailure { operation: &'static str, message: String },

    /// Another writer inserted the project first and its record could not be read back.
    #[error("concurrent provisioning conflict for repository {0}")]
    StoreConflict(u64),

    #[error("project store error: {0:#}")]
    Store(anyhow::Error),

    /// Recording a provisioned project failed and the store could not be read back, so the
    /// platform project may be live without a record.
    #[error("platform project {platform_project_id} may not have been recorded: {message}")]
    UnrecordedProject { platform_project_id: String, message: String },
}

impl DeployError {
    pub fn transient(operation: &'static str, message: impl ToString) -> Self {
        Self::TransientExternalFailure { operation, message: message.to_string() }
    }

    pub fn rejected(operation: &'static str, message: impl ToString) -> Self {
        Self::ExternalFailure { operation, message: message.to_string() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "authentication_failure",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::PartialProvisioningFailure { .. } => "partial_provisioning_failure",
            Self::WorkflowNotFound(_) => "workflow_not_found",
            Self::DispatchFailure(_) => "dispatch_failure",
            Self::TransientExternalFailure { .. } => "transient_external_failure",
            Self::ExternalFailure { .. } => "external_failure",
            Self::StoreConflict(_) => "store_conflict",
            Self::Store(_) => "store",
            Self::UnrecordedProject { .. } => "unrecorded_project",
        }
    }

    /// Whether redelivering the same event may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PartialProvisioningFailure { .. }
            | Self::DispatchFailure(_)
            | Self::TransientExternalFailure { .. }
            | Self::StoreConflict(_)
            | Self::Store(_)
            | Self::UnrecordedProject { .. } => true,
            Self::AuthenticationFailure
            | Self::MalformedPayload(_)
            | Self::WorkflowNotFound(_)
            | Self::ExternalFailure { .. } => false,
        }
    }
}
