use std::path::Path;
use std::process::{Command, Output};
use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;
use ghostmark::buffer::SourceText;
use ghostmark::clock::SystemClock;
use ghostmark::hasher::{DriftTieBreak, fingerprint};
use ghostmark::outline::TreeSitterOutline;
use ghostmark::reconcile::{ReconcileReason, ReconcileStatus, ReconciliationEngine};
use ghostmark::resolver::{Confidence, SymbolAnchorResolver};
use ghostmark::retry::RetryPolicy;
use ghostmark::types::GhostMarker;

const CART: &str = "class Cart {\n  addItem(item) {\n    this.items.push(item);\n    return this;\n  }\n}\n";

fn ghostmark_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ghostmark"));
    cmd.current_dir(dir);
    cmd.env("RUST_LOG", "off");
    cmd
}

fn run(dir: &Path, args: &[&str]) -> Output {
    return ghostmark_cmd(dir).args(args).output().unwrap();
}

fn stdout(output: &Output) -> String {
    return String::from_utf8_lossy(&output.stdout).into_owned();
}

/// Class `C` on line 1 with method `foo` on line 10, after `gap` filler lines.
fn class_with_foo(gap: usize, with_foo: bool) -> String {
    let mut text = String::from("class C {\n");
    for n in 0..gap {
        text.push_str(&format!("  // filler {n}\n"));
    }
    if with_foo {
        text.push_str("  foo() {\n    return 1;\n  }\n");
    }
    text.push_str("}\n");
    text
}

#[test]
fn symbol_anchor_follows_a_moved_method_and_orphans_a_deleted_one() {
    let clock = Rc::new(SystemClock);
    let resolver = SymbolAnchorResolver::new(
        Box::new(TreeSitterOutline),
        ["javascript".to_string()],
        Duration::from_secs(5),
        RetryPolicy::immediate(1),
        clock.clone(),
    );
    let mut engine = ReconciliationEngine::new(resolver, 10, DriftTieBreak::Nearest, clock);

    let original = SourceText::new("c.js", &class_with_foo(8, true));
    let anchor = engine.resolver_mut().create_anchor(&original, 10).expect("foo is a symbol");
    assert_eq!(anchor.symbol_path, vec!["C".to_string(), "foo".to_string()]);
    assert_eq!(anchor.offset, 0);

    let print = fingerprint(&original, 10, None).unwrap();
    let mut marker = GhostMarker {
        ast_anchor: Some(anchor.clone()),
        comment_ids: vec!["c1".to_string()],
        end_line: None,
        id: "gm-1".to_string(),
        is_orphaned: false,
        last_verified: Utc::now(),
        line: 10,
        line_hash: print.line_hash,
        line_text: print.line_text,
        next_line_text: print.next_line_text,
        prev_line_text: print.prev_line_text,
    };

    let moved = SourceText::new("c.js", &class_with_foo(48, true));
    let resolution = engine.resolver_mut().resolve_anchor(&moved, &anchor);
    assert_eq!(resolution.confidence, Confidence::Exact);
    assert_eq!(resolution.line, Some(50));

    let result = engine.reconcile_marker(&moved, &mut marker);
    assert_eq!(result.status, ReconcileStatus::AutoFixed);
    assert_eq!(result.reason, ReconcileReason::AstSymbolMoved);
    assert_eq!(result.new_line, Some(50));
    assert_eq!(marker.line, 50);

    let deleted = SourceText::new("c.js", &class_with_foo(48, false));
    let resolution = engine.resolver_mut().resolve_anchor(&deleted, &anchor);
    assert_eq!(resolution.confidence, Confidence::NotFound);

    let result = engine.reconcile_marker(&deleted, &mut marker);
    assert_eq!(result.status, ReconcileStatus::NeedsManualFix);
    assert!(marker.is_orphaned);
}

#[test]
fn add_then_status_lists_the_comment() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cart.js"), CART).unwrap();

    let add = run(dir.path(), &["add", "cart.js", "3", "TODO: validate item", "--author", "ana"]);
    assert!(add.status.success(), "add failed: {}", String::from_utf8_lossy(&add.stderr));
    assert!(dir.path().join("cart.js.comments").exists(), "comment file not created");

    let status = run(dir.path(), &["status", "cart.js"]);
    assert!(status.status.success());
    let listing = stdout(&status);
    assert!(listing.contains("cart.js:3"), "unexpected listing: {listing}");
    assert!(listing.contains("[TODO] ana: TODO: validate item"), "unexpected listing: {listing}");
}

#[test]
fn reconcile_exit_codes_follow_the_worst_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cart.js");
    std::fs::write(&source, CART).unwrap();
    assert!(run(dir.path(), &["add", "cart.js", "3", "watch this"]).status.success());

    std::fs::write(&source, format!("// header\n\n{CART}")).unwrap();
    let moved = run(dir.path(), &["reconcile"]);
    assert_eq!(moved.status.code(), Some(0), "stdout: {}", stdout(&moved));
    assert!(stdout(&moved).contains("-> 5 (ast-symbol-moved)"));

    std::fs::write(&source, "class Cart {\n}\n").unwrap();
    let lost = run(dir.path(), &["reconcile", "cart.js"]);
    assert_eq!(lost.status.code(), Some(2), "stdout: {}", stdout(&lost));
    assert!(stdout(&lost).contains("ORPHAN"));

    let orphans = run(dir.path(), &["orphans"]);
    assert_eq!(orphans.status.code(), Some(1));
    assert!(stdout(&orphans).contains("1 orphaned markers in 1 files"));
}

#[test]
fn delete_by_id_prefix_and_restore_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
    assert!(run(dir.path(), &["add", "notes.txt", "2", "keep me"]).status.success());

    let listing = run(dir.path(), &["status", "notes.txt", "--json"]);
    let parsed: serde_json::Value = serde_json::from_slice(&listing.stdout).unwrap();
    let id = parsed["comments"][0]["id"].as_str().unwrap().to_string();

    let delete = run(dir.path(), &["delete", "notes.txt", &id[..8]]);
    assert!(delete.status.success(), "delete failed: {}", String::from_utf8_lossy(&delete.stderr));
    let after: serde_json::Value =
        serde_json::from_slice(&run(dir.path(), &["status", "notes.txt", "--json"]).stdout).unwrap();
    assert_eq!(after["comments"].as_array().map(Vec::len), Some(0));

    let restore = run(dir.path(), &["restore", "notes.txt"]);
    assert!(restore.status.success(), "restore failed: {}", String::from_utf8_lossy(&restore.stderr));
    let restored: serde_json::Value =
        serde_json::from_slice(&run(dir.path(), &["status", "notes.txt", "--json"]).stdout).unwrap();
    assert_eq!(restored["comments"][0]["id"].as_str(), Some(id.as_str()));
}

#[test]
fn move_onto_the_same_file_keeps_the_comment() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cart.js"), CART).unwrap();
    assert!(run(dir.path(), &["add", "cart.js", "3", "follow me"]).status.success());
    let listing: serde_json::Value =
        serde_json::from_slice(&run(dir.path(), &["status", "cart.js", "--json"]).stdout).unwrap();
    let id = listing["comments"][0]["id"].as_str().unwrap().to_string();

    let moved = run(dir.path(), &["move", "cart.js", &id, "--line", "4", "--to", "./cart.js"]);
    assert!(moved.status.success(), "move failed: {}", String::from_utf8_lossy(&moved.stderr));

    let after: serde_json::Value =
        serde_json::from_slice(&run(dir.path(), &["status", "cart.js", "--json"]).stdout).unwrap();
    assert_eq!(after["comments"][0]["id"].as_str(), Some(id.as_str()));
    assert_eq!(after["ghostMarkers"][0]["line"].as_u64(), Some(4));
}

#[test]
fn unsupported_language_is_explained() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "plain\n").unwrap();
    let symbols = run(dir.path(), &["symbols", "notes.txt"]);
    assert!(!symbols.status.success());
    let stderr = String::from_utf8_lossy(&symbols.stderr);
    assert!(stderr.contains("Unsupported Language"), "stderr: {stderr}");
    assert!(stderr.contains("## Supported extensions"));
}
