use async_trait::async_trait;

/// A unit of expensive downstream work triggered by `call-ended` (spec
/// §4.5 point 4's "AI analysis, translation"), dispatched off the critical
/// path so the webhook acknowledgement stays prompt.
#[derive(Debug, Clone)]
pub struct CallAnalysisJob {
	pub call_id: String,
	pub transcript: Option<String>,
	pub analysis: Option<serde_json::Value>,
}

/// Port for the downstream analysis pipeline. The processor only owns
/// dispatching this off the critical path (`tokio::spawn` + a timeout
/// budget) — what the hook actually does is the gateway's concern.
#[async_trait]
pub trait AnalysisHook: Send + Sync + 'static {
	async fn run(&self, job: CallAnalysisJob);
}

pub struct NoopAnalysisHook;

#[async_trait]
impl AnalysisHook for NoopAnalysisHook {
	async fn run(&self, _job: CallAnalysisJob) {}
}
