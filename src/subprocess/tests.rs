#[cfg(test)]
mod tests {
    use super::super::*;
    use std::time::Duration;

    fn quiet_config(stdout: &LineBuffer, stderr: &LineBuffer) -> ProcessConfig {
        ProcessConfig::new()
            .with_prefix(false)
            .poll_interval(Duration::from_millis(20))
            .stdout(stdout.sink())
            .stderr(stderr.sink())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_production_manager_exec() {
        let manager = SubprocessManager::production();
        let (stdout, stderr) = (LineBuffer::new(), LineBuffer::new());

        let success = manager
            .exec(["echo", "hello world"], quiet_config(&stdout, &stderr))
            .await
            .unwrap();

        assert!(success);
        assert_eq!(stdout.lines(), vec!["hello world"]);
        assert!(stderr.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_production_manager_shell_failure() {
        let manager = SubprocessManager::production();
        let (stdout, stderr) = (LineBuffer::new(), LineBuffer::new());

        let success = manager
            .shell(["echo oops >&2;", "exit 7"], quiet_config(&stdout, &stderr))
            .await
            .unwrap();

        assert!(!success);
        assert_eq!(stderr.lines(), vec!["oops"]);
    }

    #[tokio::test]
    async fn test_production_manager_command_not_found() {
        let manager = SubprocessManager::production();
        let (stdout, stderr) = (LineBuffer::new(), LineBuffer::new());

        let result = manager
            .exec(["nonexistent-command-12345"], quiet_config(&stdout, &stderr))
            .await;

        assert!(matches!(
            result.unwrap_err(),
            ProcessError::CommandNotFound { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_manager_basic() {
        let (manager, mock) = SubprocessManager::mock();
        mock.expect_command("git")
            .stdout_line("On branch main")
            .returns_exit_code(0)
            .finish();

        let (stdout, stderr) = (LineBuffer::new(), LineBuffer::new());
        let mut process = manager
            .process(["git", "status"], quiet_config(&stdout, &stderr).name("git"))
            .unwrap();

        assert!(process.exec().await.unwrap());
        assert_eq!(stdout.lines(), vec!["On branch main"]);
        assert!(mock.verify_launched("git", 1));

        let history = mock.get_call_history();
        assert_eq!(history[0].name, "git");
        assert_eq!(history[0].tokens, vec!["git", "status"]);
        assert_eq!(history[0].mode, LaunchMode::Exec);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_manager_reset() {
        let (manager, mock) = SubprocessManager::mock();
        mock.expect_command("make").finish();

        let config = ProcessConfig::new()
            .stdout(LineSink::discard())
            .stderr(LineSink::discard());
        assert!(manager.exec(["make"], config.clone()).await.unwrap());

        mock.reset();
        assert!(mock.get_call_history().is_empty());
        assert!(matches!(
            manager.exec(["make"], config).await.unwrap_err(),
            ProcessError::MockExpectationNotMet(_)
        ));
    }
}
