#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::CoordError;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.coordination.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.coordination.staleness_window(), Duration::from_secs(30));
        assert_eq!(config.coordination.operation_lock_ttl, Duration::from_secs(120));
        assert_eq!(config.idempotency.ttl, Duration::from_secs(300));
        assert_eq!(config.session.negative_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.session.key_prefix, "session:");
        assert!(!config.session.require_ip_match);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [coordination]
            heartbeat_interval = "2s"
            missed_heartbeats = 5

            [session]
            idle_timeout = "10m"
            require_ip_match = true
            "#,
        )
        .unwrap();

        assert_eq!(config.coordination.staleness_window(), Duration::from_secs(10));
        assert_eq!(config.coordination.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.session.idle_timeout, Duration::from_secs(600));
        assert!(config.session.require_ip_match);
        assert_eq!(config.session.max_sessions_per_user, 5);
    }

    #[test]
    fn too_few_missed_heartbeats_rejected() {
        for missed in [0, 1] {
            let toml = format!("[coordination]\nmissed_heartbeats = {missed}\n");
            let err = Config::from_toml_str(&toml).unwrap_err();
            assert!(matches!(err, CoordError::Config(_)));
        }
        let config = Config::from_toml_str("[coordination]\nmissed_heartbeats = 2\n").unwrap();
        assert_eq!(config.coordination.staleness_window(), Duration::from_secs(20));
    }

    #[test]
    fn malformed_duration_rejected() {
        let err = Config::from_toml_str("[idempotency]\nttl = \"soon\"\n").unwrap_err();
        assert!(matches!(err, CoordError::Config(_)));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[idempotency]\nsweep_interval = \"1m\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.idempotency.sweep_interval, Duration::from_secs(60));

        let missing = file.path().with_extension("missing");
        assert!(matches!(Config::load(&missing), Err(CoordError::Config(_))));
    }
}
