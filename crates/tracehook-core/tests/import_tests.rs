use std::fs;
use std::path::Path;

use tempfile::tempdir;
use tracehook_core::import::{BytecodeCache, LoaderKind};
use tracehook_core::runtime::SharedBuffer;
use tracehook_core::{Interpreter, InterpreterConfig};

fn interpreter(dir: &Path, out: &SharedBuffer, dont_write_bytecode: bool) -> Interpreter {
    let config = InterpreterConfig {
        path: vec![dir.to_path_buf()],
        dont_write_bytecode,
        ..Default::default()
    };
    Interpreter::with_output(config, out.sink(), out.sink())
}

fn run(interp: &mut Interpreter, source: &str) {
    let main = interp.main_module().expect("main module");
    if let Err(err) = interp.run_source(source, "main.py", &main) {
        panic!("script failed: {err}");
    }
}

fn package(dir: &Path) {
    let pkg = dir.join("pkg");
    fs::create_dir(&pkg).unwrap();
    fs::write(pkg.join("__init__.py"), "name = 'pkg'\n").unwrap();
    fs::write(pkg.join("sub.py"), "value = 41 + 1\n").unwrap();
}

#[test]
fn test_dotted_import_binds_submodule() {
    let dir = tempdir().unwrap();
    package(dir.path());
    let out = SharedBuffer::new();
    let mut interp = interpreter(dir.path(), &out, true);

    run(&mut interp, "import pkg.sub\nprint(pkg.name, pkg.sub.value)\n");

    assert_eq!(out.contents(), "pkg 42\n");
    assert!(interp.module("pkg").is_some());
    assert!(interp.module("pkg.sub").is_some());
}

#[test]
fn test_from_package_falls_back_to_submodule() {
    let dir = tempdir().unwrap();
    package(dir.path());
    let out = SharedBuffer::new();
    let mut interp = interpreter(dir.path(), &out, true);

    run(
        &mut interp,
        "from pkg import sub\nprint(sub.value)\ntry:\n    from pkg import nothing\nexcept ImportError as e:\n    print(e)\n",
    );

    assert_eq!(out.contents(), "42\ncannot import name 'nothing' from 'pkg'\n");
}

#[test]
fn test_missing_modules_raise_module_not_found() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("plain.py"), "x = 1\n").unwrap();
    let out = SharedBuffer::new();
    let mut interp = interpreter(dir.path(), &out, true);

    run(
        &mut interp,
        "try:\n    import absent\nexcept ModuleNotFoundError as e:\n    print(e)\ntry:\n    import plain.child\nexcept ImportError as e:\n    print(type(e) is ModuleNotFoundError)\n",
    );

    assert_eq!(out.contents(), "no module named 'absent'\nTrue\n");
}

#[test]
fn test_builtin_modules_skip_path_search() {
    let dir = tempdir().unwrap();
    // a same-named file on the path must not shadow the builtin
    fs::write(dir.path().join("math.py"), "pi = 3\n").unwrap();
    let out = SharedBuffer::new();
    let mut interp = interpreter(dir.path(), &out, true);

    let spec = interp.find_spec("math", None).unwrap();
    assert_eq!(spec.loader.kind(), LoaderKind::Builtin);
    run(&mut interp, "import math\nprint(math.pi > 3.1)\n");
    assert_eq!(out.contents(), "True\n");
}

#[test]
fn test_failed_module_is_not_registered() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("half.py"), "ready = True\nraise RuntimeError('stop')\n").unwrap();
    let out = SharedBuffer::new();
    let mut interp = interpreter(dir.path(), &out, true);

    run(&mut interp, "try:\n    import half\nexcept RuntimeError as e:\n    print(e)\n");

    assert_eq!(out.contents(), "stop\n");
    assert!(interp.module("half").is_none());
}

#[test]
fn test_plain_imports_write_and_reuse_cache() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("cached.py");
    fs::write(&source, "value = 'fresh'\n").unwrap();
    let out = SharedBuffer::new();

    let mut interp = interpreter(dir.path(), &out, false);
    run(&mut interp, "import cached\n");
    let entry = BytecodeCache::cache_path(&source);
    assert!(entry.is_file(), "missing {}", entry.display());

    // a fresh interpreter reads the same entry
    let mut interp = interpreter(dir.path(), &out, false);
    run(&mut interp, "import cached\nprint(cached.value)\n");
    assert_eq!(out.contents(), "fresh\n");
}

#[test]
fn test_modified_source_invalidates_cache() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("edited.py");
    fs::write(&source, "value = 1\n").unwrap();
    let out = SharedBuffer::new();

    let mut interp = interpreter(dir.path(), &out, false);
    run(&mut interp, "import edited\n");

    // different size, so stale even within one mtime tick
    fs::write(&source, "value = 1234\n").unwrap();
    let mut interp = interpreter(dir.path(), &out, false);
    run(&mut interp, "import edited\nprint(edited.value)\n");
    assert_eq!(out.contents(), "1234\n");
}

#[test]
fn test_dont_write_bytecode() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("nocache.py");
    fs::write(&source, "x = 1\n").unwrap();
    let out = SharedBuffer::new();
    let mut interp = interpreter(dir.path(), &out, true);

    run(&mut interp, "import nocache\n");

    assert!(!BytecodeCache::cache_path(&source).exists());
}
