//! Task types submitted by the command layer.
//!
//! Task types are open strings; these are the ones the bundled manager
//! helpers build. Domains are free to register others.

/// Push an image to a registry
pub const DOCKER_PUSH: &str = "docker_push";
/// Build an image from a Dockerfile
pub const DOCKER_BUILD: &str = "docker_build";
/// Pull an image from a registry
pub const DOCKER_PULL: &str = "docker_pull";

/// Download an Ollama model
pub const OLLAMA_PULL: &str = "ollama_pull";
/// Run a prompt against an Ollama model
pub const OLLAMA_RUN: &str = "ollama_run";

/// Apply a Kubernetes manifest
pub const K8S_DEPLOY: &str = "k8s_deploy";

/// Create a Vast.ai GPU instance
pub const VAST_CREATE: &str = "vast_create";

/// Clone a GitHub repository
pub const GITHUB_CLONE: &str = "github_clone";

/// Upload a file over FTP
pub const FTP_UPLOAD: &str = "ftp_upload";
/// Download a file over FTP
pub const FTP_DOWNLOAD: &str = "ftp_download";

/// Copy a file to a remote host over SCP
pub const SCP_UPLOAD: &str = "scp_upload";
/// Run a command on a remote host over SSH
pub const SSH_EXECUTE: &str = "ssh_execute";

/// Sample host resource usage
pub const SYSTEM_MONITOR: &str = "system_monitor";

/// Run a local shell script
pub const CUSTOM_SCRIPT: &str = "custom_script";
/// Run a local program
pub const CUSTOM_COMMAND: &str = "custom_command";

/// Default category for a task type: the prefix before the first `_`
pub fn category_of(task_type: &str) -> &str {
    task_type
        .split_once('_')
        .map(|(prefix, _)| prefix)
        .unwrap_or(task_type)
}
