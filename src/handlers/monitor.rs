//! Host resource sampling for `system_monitor` tasks

use crate::handler::{TaskContext, TaskHandler};
use crate::task::{kinds, Params, TaskError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

/// Most processes listed by the `processes` monitor type
const PROCESS_LIMIT: usize = 100;

const MONITOR_TYPES: &[&str] = &["general", "processes"];

/// Samples CPU, memory and disk usage (`monitor_type = "general"`, the
/// default) or the busiest processes (`monitor_type = "processes"`).
#[derive(Debug, Clone, Default)]
pub struct SystemMonitorHandler;

impl SystemMonitorHandler {
    /// Task type this handler serves
    pub fn task_type(&self) -> &'static str {
        kinds::SYSTEM_MONITOR
    }
}

#[async_trait]
impl TaskHandler for SystemMonitorHandler {
    fn validate(&self, params: &Params) -> Result<(), TaskError> {
        match params.get("monitor_type") {
            None | Some(Value::Null) => Ok(()),
            Some(Value::String(kind)) if MONITOR_TYPES.contains(&kind.as_str()) => Ok(()),
            Some(other) => Err(TaskError::validation(format!(
                "Unknown monitor type: {other}"
            ))
            .with_details(json!({ "monitor_type": other, "supported": MONITOR_TYPES }))),
        }
    }

    async fn execute(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        let monitor_type = ctx.str_param_or("monitor_type", "general").to_string();
        ctx.report(10, format!("Starting system monitoring: {monitor_type}"))
            .await;

        let mut sys = System::new();
        if monitor_type == "processes" {
            sys.refresh_all();
        } else {
            sys.refresh_cpu_usage();
        }

        // cpu usage is a delta between two refreshes
        tokio::select! {
            _ = tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL) => {}
            _ = ctx.cancelled() => {}
        }
        ctx.checkpoint()?;
        ctx.report(50, "Sampling").await;

        let result = if monitor_type == "processes" {
            sys.refresh_all();
            sample_processes(&sys)
        } else {
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            sample_general(&sys)
        };

        debug!(task_id = ctx.task_id(), "System sample taken: {}", monitor_type);
        ctx.report(100, "System monitoring completed").await;
        Ok(result)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn sample_general(sys: &System) -> Value {
    let total_memory = sys.total_memory();
    let available_memory = sys.available_memory();

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"));
    let (disk_total, disk_free) = match root {
        Some(disk) => (disk.total_space(), disk.available_space()),
        None => disks.list().iter().fold((0, 0), |(total, free), disk| {
            (total + disk.total_space(), free + disk.available_space())
        }),
    };

    json!({
        "monitor_type": "general",
        "cpu_percent": sys.global_cpu_usage(),
        "memory_percent": percent(total_memory.saturating_sub(available_memory), total_memory),
        "memory_available": available_memory,
        "disk_percent": percent(disk_total.saturating_sub(disk_free), disk_total),
        "disk_free": disk_free,
    })
}

fn sample_processes(sys: &System) -> Value {
    let total_memory = sys.total_memory();
    let mut processes: Vec<_> = sys.processes().values().collect();
    processes.sort_by(|a, b| b.cpu_usage().total_cmp(&a.cpu_usage()));

    let listed: Vec<Value> = processes
        .iter()
        .take(PROCESS_LIMIT)
        .map(|process| {
            json!({
                "pid": process.pid().as_u32(),
                "name": process.name(),
                "cpu_percent": process.cpu_usage(),
                "memory_percent": percent(process.memory(), total_memory),
            })
        })
        .collect();

    json!({
        "monitor_type": "processes",
        "process_count": processes.len(),
        "processes": listed,
    })
}
