//! The reason for a fatal exit must be in the log file, not only on stderr.

use std::net::TcpListener;
use std::process::Command;

#[test]
fn unreachable_server_is_logged_before_exit() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let logs = tempfile::tempdir().expect("tempdir");

    for run in 0..5 {
        let output = Command::new(env!("CARGO_BIN_EXE_xmpp-receiver"))
            .arg(format!("--log-dir={}", logs.path().display()))
            .args(["guestbook", "127.0.0.1", &format!("127.0.0.1:{}", port), "secret"])
            .env_remove("RUST_LOG")
            .output()
            .expect("run xmpp-receiver");
        assert_eq!(output.status.code(), Some(1), "run {} should exit with status 1", run);

        let log = std::fs::read_to_string(logs.path().join("xmppreceiver-guestbook@127.0.0.1.log"))
            .expect("read log file");
        assert_eq!(
            log.matches("Fatal error, exiting").count(),
            run + 1,
            "run {} did not log its fatal error:\n{}",
            run,
            log
        );
        assert!(log.contains("could not connect to XMPP server"));
        assert!(!log.contains("secret"));
    }
}
