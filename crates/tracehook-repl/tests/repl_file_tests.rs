use std::fs;
use std::process::Command;

use tempfile::tempdir;

#[test]
fn test_file_input_is_echoed_and_traced() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("session.txt");
    fs::write(
        &script,
        "def inc(n):\n    return n + 1\n\n.traceconfig -p @\n.trace inc(1)\n.autotrace\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tracehook-repl"))
        .arg(&script)
        .arg("--no-color")
        .current_dir(dir.path())
        .env_remove("TRACEHOOK_DEBUG")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run tracehook-repl");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains(">>> def inc(n):\n...     return n + 1\n"), "{stdout}");
    assert!(stdout.contains(">>> .trace inc(1)\n2\n"), "{stdout}");
    assert!(stdout.ends_with("Autotrace: off\n"), "{stdout}");
    assert!(stderr.contains("@ >>> Call to __trace_block_1"), "{stderr}");
    assert!(stderr.contains("@     >>> Call to inc"), "{stderr}");
}
