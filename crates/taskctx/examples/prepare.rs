//! Prepare a small conversation for submission: elide a duplicate file read,
//! then watch an overflowing previous request trigger truncation.
//!
//! Run with: `cargo run --example prepare`

use taskctx::budget::ModelDescriptor;
use taskctx::manager::ContextManager;
use taskctx::store::FsEditLogStore;
use taskctx::{ContentBlock, Message};

fn read_result(path: &str, content: &str) -> Message {
    Message::user_blocks(vec![
        ContentBlock::text(format!("[read_file for '{path}'] Result:")),
        ContentBlock::text(content),
    ])
}

fn main() {
    let store = FsEditLogStore::new(std::env::temp_dir().join("taskctx-example"));
    let mut manager = ContextManager::new("example-task", Box::new(store)).with_model(Some(
        ModelDescriptor {
            context_window: Some(200_000),
        },
    ));

    let history = vec![
        read_result("src/main.rs", "fn main() { println!(\"hi\"); }"),
        Message::assistant("That file prints a greeting."),
        read_result("src/main.rs", "fn main() { println!(\"hi\"); }"),
        Message::assistant("Reading it again shows the same content."),
    ];

    // First turn: the earlier read is elided, the latest read survives.
    let outcome = manager.process(&history, 0);
    println!(
        "prepared {} message(s), ~{} tokens, truncated: {}",
        outcome.prepared_history.len(),
        outcome.tokens_used,
        outcome.was_truncated
    );
    println!(
        "first read now says: {}",
        outcome.prepared_history[0].block_text(1).unwrap()
    );

    // Next turn: pretend the previous request blew past the budget.
    let outcome = manager.process(&history, 500_000);
    println!(
        "after overflow: {} message(s) remain, truncated: {}",
        outcome.prepared_history.len(),
        outcome.was_truncated
    );
}
