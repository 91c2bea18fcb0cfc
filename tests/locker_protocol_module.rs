use lemc::identity::{resolve_file_meta, JobMeta, Scope};
use lemc::locker::{ensure_locker_tree, CacheChannel, CacheFiles, LockerError};
use lemc::protocol::{read_lines, Interpreter, LineAssembler, ProtocolLine};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::tempdir;

fn job() -> JobMeta {
    JobMeta {
        uuid: "abc".to_string(),
        page_id: "7".to_string(),
        step_id: "1".to_string(),
        user_id: "42".to_string(),
        username: "alice".to_string(),
        recipe_name: "demo".to_string(),
        scope: Scope::Individual,
    }
}

#[test]
fn trunc_then_append_yields_documented_html() {
    let dir = tempdir().expect("tempdir");
    let mut cache = CacheFiles::open(dir.path()).expect("open cache");
    {
        let mut interpreter = Interpreter::new(&mut cache);
        interpreter
            .apply("lemc.html.trunc; <div>hi</div>")
            .expect("trunc");
        interpreter.apply("lemc.html.append; <br>").expect("append");
        assert_eq!(interpreter.applied(), 2);
    }
    cache.close();
    let html = fs::read_to_string(dir.path().join("cache.html")).expect("read html");
    assert_eq!(html, "<div>hi</div>\n<br>\n");
}

#[test]
fn trunc_replaces_content_exactly() {
    let dir = tempdir().expect("tempdir");
    let mut cache = CacheFiles::open(dir.path()).expect("open cache");
    cache
        .truncate(CacheChannel::Css, "a long first payload")
        .expect("first");
    cache.truncate(CacheChannel::Css, "body{}").expect("second");
    cache.close();
    assert_eq!(
        fs::read_to_string(dir.path().join("cache.css")).expect("read css"),
        "body{}"
    );
}

#[test]
fn appends_concatenate_newline_terminated() {
    let dir = tempdir().expect("tempdir");
    let mut cache = CacheFiles::open(dir.path()).expect("open cache");
    for n in 0..5 {
        cache
            .append(CacheChannel::Js, &format!("step({n});"))
            .expect("append");
    }
    cache.close();
    assert_eq!(
        fs::read_to_string(dir.path().join("cache.js")).expect("read js"),
        "step(0);\nstep(1);\nstep(2);\nstep(3);\nstep(4);\n"
    );
}

#[test]
fn closed_cache_rejects_writes_and_closing_twice_is_harmless() {
    let dir = tempdir().expect("tempdir");
    let mut cache = CacheFiles::open(dir.path()).expect("open cache");
    cache.close();
    cache.close();
    assert!(cache.is_closed());
    let err = cache
        .truncate(CacheChannel::Html, "late")
        .expect_err("closed");
    assert!(matches!(err, LockerError::CacheClosed { .. }));
}

#[test]
fn malformed_commands_degrade_to_text() {
    let dir = tempdir().expect("tempdir");
    let mut cache = CacheFiles::open(dir.path()).expect("open cache");
    let mut interpreter = Interpreter::new(&mut cache);
    for line in [
        "lemc.html.replace; nope",
        "lemc.svg.trunc; <svg/>",
        "lemc.html.trunc no separator",
        "plain output",
    ] {
        let parsed = interpreter.apply(line).expect("apply");
        assert_eq!(parsed, ProtocolLine::Text(line.to_string()));
    }
    assert_eq!(interpreter.applied(), 0);
}

#[test]
fn line_reader_handles_split_utf8_and_missing_final_newline() {
    let bytes = "héllo\nwörld".as_bytes();
    let split = bytes.iter().position(|b| *b == 0xc3).expect("multibyte") + 1;
    let mut assembler = LineAssembler::default();
    assert!(assembler.push(&bytes[..split]).is_empty());
    assert_eq!(assembler.push(&bytes[split..]), vec!["héllo".to_string()]);
    assert_eq!(assembler.finish(), Some("wörld".to_string()));

    let mut lines = Vec::new();
    read_lines(Cursor::new(bytes.to_vec()), |line| {
        lines.push(line);
        true
    })
    .expect("read lines");
    assert_eq!(lines, vec!["héllo".to_string(), "wörld".to_string()]);
}

#[test]
fn locker_tree_is_created_idempotently_with_host_rewrite() {
    let dir = tempdir().expect("tempdir");
    let meta = resolve_file_meta(&job(), false, dir.path()).expect("file meta");
    let host = Path::new("/host/locker");

    let tree = ensure_locker_tree(&meta, Some(host)).expect("first");
    ensure_locker_tree(&meta, Some(host)).expect("second");
    for path in tree.internal.all() {
        assert!(path.is_dir(), "{} should exist", path.display());
    }
    let internal_rel = tree
        .internal
        .cache
        .strip_prefix(dir.path())
        .expect("internal under root");
    let bind_rel = tree.bind.cache.strip_prefix(host).expect("bind under host");
    assert_eq!(internal_rel, bind_rel);
}
