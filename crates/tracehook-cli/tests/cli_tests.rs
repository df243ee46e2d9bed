use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn tracehook(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tracehook"))
        .args(args)
        .current_dir(dir)
        .env_remove("TRACEHOOK_DEBUG")
        .env_remove("RUST_LOG")
        .env("TRACEHOOK_DONTWRITEBYTECODE", "1")
        .output()
        .expect("failed to run tracehook")
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn test_script_output_and_status() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("hello.py"), "x = 1\nprint(x + 1)\n").unwrap();

    let output = tracehook(dir.path(), &["hello.py"]);

    assert!(output.status.success());
    assert_eq!(text(&output.stdout), "2\n");
    assert_eq!(text(&output.stderr), "");
}

#[test]
fn test_trace_goes_to_stderr() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("calc.py"),
        "def add(a, b):\n    c = a + b\n    return c\nprint(add(1, 2))\n",
    )
    .unwrap();

    let output = tracehook(dir.path(), &["calc.py"]);

    assert_eq!(text(&output.stdout), "3\n");
    let trace = text(&output.stderr);
    assert!(trace.contains("DBG: >>> Call to add in File"), "{trace}");
    assert!(trace.contains("a = 1"), "{trace}");
    assert!(trace.contains("c = 3"), "{trace}");
    assert!(trace.contains("DBG: <<< Return value from add: 3"), "{trace}");
}

#[test]
fn test_uncaught_exception_exits_one() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("fail.py"), "print('before')\nraise ValueError('nope')\n").unwrap();

    let output = tracehook(dir.path(), &["fail.py"]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(text(&output.stdout), "before\n");
    let stderr = text(&output.stderr);
    assert!(stderr.contains("Traceback (most recent call last):"), "{stderr}");
    assert!(stderr.ends_with("ValueError: nope\n"), "{stderr}");
}

#[test]
fn test_sys_exit_status() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("quit.py"), "import sys\nsys.exit(3)\n").unwrap();

    let output = tracehook(dir.path(), &["quit.py"]);

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_module_target() {
    let dir = tempdir().unwrap();
    let tools = dir.path().join("tools");
    fs::create_dir(&tools).unwrap();
    fs::write(tools.join("__init__.py"), "").unwrap();
    fs::write(tools.join("report.py"), "import sys\nprint(sys.argv[1:])\n").unwrap();

    let output = tracehook(dir.path(), &["-m", "tools.report", "-x", "y"]);

    assert!(output.status.success(), "{}", text(&output.stderr));
    assert_eq!(text(&output.stdout), "['-x', 'y']\n");

    let output = tracehook(dir.path(), &["-m", "no_such_tool"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(text(&output.stderr).contains("no_such_tool"));
}

#[test]
fn test_usage_errors() {
    let dir = tempdir().unwrap();

    let output = tracehook(dir.path(), &["-h"]);
    assert!(output.status.success());
    assert!(text(&output.stdout).starts_with("usage: tracehook"));

    let output = tracehook(dir.path(), &["-d", "zero", "x.py"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(text(&output.stderr), "error: -d argument must be an integer\n");

    let output = tracehook(dir.path(), &["-m"]);
    assert_eq!(output.status.code(), Some(2));

    let output = tracehook(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        text(&output.stderr),
        "error: must specify either scriptfile or module (-m)\n"
    );
}
