//! Approval channel between the engine and its host application.

use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

/// Yes/no decision channel for pause-and-notify and iteration approvals.
///
/// Object-safe (boxed future) so the orchestrator can hold an optional
/// `Arc<dyn ApprovalHandler>`. When no handler is installed, the
/// orchestrator treats every request as approved.
pub trait ApprovalHandler: Send + Sync {
    /// Ask the caller for a yes/no decision. `true` means proceed.
    fn request(
        &self,
        execution_id: Uuid,
        message: String,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysNo;

    impl ApprovalHandler for AlwaysNo {
        fn request(
            &self,
            _execution_id: Uuid,
            _message: String,
        ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
            Box::pin(async { false })
        }
    }

    #[tokio::test]
    async fn handler_is_object_safe() {
        let handler: std::sync::Arc<dyn ApprovalHandler> = std::sync::Arc::new(AlwaysNo);
        assert!(!handler.request(Uuid::now_v7(), "retry?".to_string()).await);
    }
}
