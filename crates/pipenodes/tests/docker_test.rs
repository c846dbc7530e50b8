use pipecore::{SandboxHandle, SandboxRuntime, SandboxStatus};
use pipenodes::DockerSandbox;

#[test]
fn test_parse_state() {
    assert_eq!(DockerSandbox::parse_state("running\n"), SandboxStatus::Running);
    assert_eq!(DockerSandbox::parse_state("created"), SandboxStatus::Starting);
    assert_eq!(DockerSandbox::parse_state("restarting"), SandboxStatus::Starting);
    assert_eq!(DockerSandbox::parse_state("exited"), SandboxStatus::Stopped);
    assert_eq!(DockerSandbox::parse_state("paused"), SandboxStatus::Stopped);
    assert_eq!(DockerSandbox::parse_state(""), SandboxStatus::Missing);
}

// Needs a running container named by PIPEFLOW_TEST_CONTAINER
fn container() -> Option<SandboxHandle> {
    std::env::var("PIPEFLOW_TEST_CONTAINER").ok().map(SandboxHandle::new)
}

#[tokio::test]
#[ignore]
async fn test_docker_copy_and_exec() {
    let Some(handle) = container() else { return };
    let docker = DockerSandbox::new();

    assert_eq!(docker.status(&handle).await.unwrap(), SandboxStatus::Running);

    let copied = docker
        .copy_bytes_to_sandbox(&handle, b"hello from the host", "/tmp/pipeflow-test/hello.txt")
        .await
        .unwrap();
    assert!(copied);

    let back = docker
        .copy_from_sandbox(&handle, "/tmp/pipeflow-test/hello.txt")
        .await
        .unwrap();
    assert_eq!(back, b"hello from the host");

    let out = docker
        .exec_command(&handle, &["pwd".to_string()], Some("/tmp"))
        .await
        .unwrap();
    assert!(out.success());
    assert_eq!(out.text().trim(), "/tmp");
}

#[tokio::test]
#[ignore]
async fn test_docker_missing_container() {
    let docker = DockerSandbox::new();
    let handle = SandboxHandle::new("pipeflow-no-such-container");

    assert_eq!(docker.status(&handle).await.unwrap(), SandboxStatus::Missing);
    assert!(docker.start_if_not_running(&handle).await.is_err());
    assert!(docker.copy_from_sandbox(&handle, "/etc/hostname").await.is_err());
}
