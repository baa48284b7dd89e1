//! Built-in job handlers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::handler::{JobContext, JobFailure, JobHandler};
use super::job::{Job, JobParameters, JobResult};
use super::manager::JobManager;

/// Register every built-in handler on a manager.
pub fn register_builtin_handlers(manager: &JobManager) {
    manager.register_handler(EchoHandler::JOB_TYPE, EchoHandler::new);
    manager.register_handler(CsvImportHandler::JOB_TYPE, CsvImportHandler::new);
}

/// Handler: return the job parameters as result data.
///
/// An optional `delay_ms` parameter makes the handler wait before answering,
/// which is handy for exercising timeouts and cancellation end to end.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl EchoHandler {
    pub const JOB_TYPE: &'static str = "echo";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for EchoHandler {
    async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<JobResult, JobFailure> {
        if let Some(delay) = job.parameters.get("delay_ms") {
            let millis = delay
                .as_u64()
                .ok_or_else(|| JobFailure::invalid_input("delay_ms must be a non-negative integer"))?;
            ctx.update_progress(0.0, "Waiting", "delay");
            ctx.cancellable(tokio::time::sleep(Duration::from_millis(millis)))
                .await?;
        }

        ctx.log_info("Echoing parameters");
        Ok(JobResult::with_data(job.parameters.clone()))
    }
}

/// Handler: import product rows submitted as a `rows` array of objects.
///
/// Each row must carry every column listed in `required_columns`
/// (default: `sku`, `title`, `price`) and a numeric `price`. Invalid rows are
/// skipped with a warning; a batch without a single valid row is rejected.
#[derive(Debug, Clone)]
pub struct CsvImportHandler {
    default_columns: Vec<String>,
}

impl CsvImportHandler {
    pub const JOB_TYPE: &'static str = "csv_import";

    pub fn new() -> Self {
        Self {
            default_columns: vec!["sku".into(), "title".into(), "price".into()],
        }
    }

    fn required_columns(&self, parameters: &JobParameters) -> Result<Vec<String>, JobFailure> {
        match parameters.get("required_columns") {
            None => Ok(self.default_columns.clone()),
            Some(Value::Array(columns)) => columns
                .iter()
                .map(|c| {
                    c.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| JobFailure::invalid_input("required_columns must contain strings"))
                })
                .collect(),
            Some(_) => Err(JobFailure::invalid_input("required_columns must be an array")),
        }
    }

    fn check_row(row: &Value, required: &[String]) -> Result<(), String> {
        let fields = row.as_object().ok_or("not an object")?;
        if let Some(missing) = required.iter().find(|column| match fields.get(column.as_str()) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }) {
            return Err(format!("missing {}", missing));
        }
        if let Some(price) = fields.get("price") {
            let numeric = match price {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            };
            if !numeric {
                return Err("price is not a number".into());
            }
        }
        Ok(())
    }
}

impl Default for CsvImportHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for CsvImportHandler {
    async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<JobResult, JobFailure> {
        let rows = job
            .parameters
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| JobFailure::invalid_input("rows must be an array"))?;
        let required = self.required_columns(&job.parameters)?;

        ctx.log_info(&format!("Importing {} rows", rows.len()));
        ctx.update_progress(0.0, format!("Importing {} rows", rows.len()), "validate");

        let mut imported = 0usize;
        let mut warnings = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(JobFailure::Cancelled);
            }

            match Self::check_row(row, &required) {
                Ok(()) => imported += 1,
                Err(reason) => warnings.push(format!("row {}: {}", index + 1, reason)),
            }

            let percent = (index + 1) as f64 * 100.0 / rows.len() as f64;
            ctx.update_progress(percent, format!("Processed {} of {}", index + 1, rows.len()), "import");
            tokio::task::yield_now().await;
        }

        if !warnings.is_empty() {
            ctx.log_warn(&format!("Skipped {} of {} rows", warnings.len(), rows.len()));
        }

        if imported == 0 && !rows.is_empty() {
            return Err(JobFailure::invalid_input(format!(
                "no valid rows out of {}",
                rows.len()
            )));
        }

        let data = json!({
            "imported": imported,
            "skipped": warnings.len(),
        });
        let data = match data {
            Value::Object(map) => map,
            _ => JobParameters::new(),
        };

        Ok(JobResult::with_data(data).with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{JobId, JobRequest, JobStatus};
    use crate::jobs::store::JobStore;
    use chrono::Utc;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn running(request: JobRequest) -> (Job, JobContext, Arc<JobStore>) {
        let store = Arc::new(JobStore::new());
        let job = Job::new(JobId::new(), request, 0, 60, Utc::now());
        store.insert(job.clone());
        let job = store.begin_execution(&job.id, Utc::now()).unwrap();
        let ctx = JobContext::new(&job, store.clone(), CancellationToken::new());
        (job, ctx, store)
    }

    #[tokio::test]
    async fn test_echo() {
        let (job, ctx, _) = running(JobRequest::new("echo", 1).with_parameter("hello", "world"));
        let result = EchoHandler::new().execute(&job, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["hello"], "world");
    }

    #[tokio::test]
    async fn test_echo_rejects_bad_delay() {
        let (job, ctx, _) = running(JobRequest::new("echo", 1).with_parameter("delay_ms", "soon"));
        let failure = EchoHandler::new().execute(&job, &ctx).await.unwrap_err();
        assert!(!failure.is_transient());
    }

    #[tokio::test]
    async fn test_csv_import_skips_invalid_rows() {
        let rows = json!([
            {"sku": "A-1", "title": "Mug", "price": 4.5},
            {"sku": "A-2", "title": "", "price": 3},
            {"sku": "A-3", "title": "Plate", "price": "cheap"},
            {"sku": "A-4", "title": "Bowl", "price": "7.25"},
        ]);
        let (job, ctx, store) = running(JobRequest::new("csv_import", 1).with_parameter("rows", rows));

        let result = CsvImportHandler::new().execute(&job, &ctx).await.unwrap();
        let data = result.data.unwrap();
        assert_eq!(data["imported"], 2);
        assert_eq!(data["skipped"], 2);
        assert_eq!(
            result.warnings,
            vec!["row 2: missing title".to_string(), "row 3: price is not a number".to_string()]
        );

        let stored = store.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.progress_percentage, 100.0);
        assert_eq!(stored.current_step, "import");
    }

    #[tokio::test]
    async fn test_csv_import_requires_rows() {
        let (job, ctx, _) = running(JobRequest::new("csv_import", 1));
        let failure = CsvImportHandler::new().execute(&job, &ctx).await.unwrap_err();
        assert_eq!(failure, JobFailure::invalid_input("rows must be an array"));
    }

    #[tokio::test]
    async fn test_csv_import_custom_columns() {
        let rows = json!([{"ean": "123"}, {"name": "x"}]);
        let (job, ctx, _) = running(
            JobRequest::new("csv_import", 1)
                .with_parameter("rows", rows)
                .with_parameter("required_columns", json!(["ean"])),
        );
        let result = CsvImportHandler::new().execute(&job, &ctx).await.unwrap();
        assert_eq!(result.data.unwrap()["imported"], 1);
        assert_eq!(result.warnings, vec!["row 2: missing ean".to_string()]);
    }

    #[tokio::test]
    async fn test_csv_import_all_invalid_is_permanent() {
        let rows = json!([{"sku": "A-1"}]);
        let (job, ctx, _) = running(JobRequest::new("csv_import", 1).with_parameter("rows", rows));
        let failure = CsvImportHandler::new().execute(&job, &ctx).await.unwrap_err();
        assert!(matches!(failure, JobFailure::Permanent { .. }));
    }
}
