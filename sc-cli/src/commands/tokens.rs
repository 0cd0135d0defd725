//! Tokens command - print how the token space splits across members.

use anyhow::{Result, bail};
use sc_cluster::{assign_tokens, token_layout};

/// Run the tokens command.
pub fn run(members: &[String], node: Option<&str>, max_tokens: u32, json: bool) -> Result<()> {
    if max_tokens == 0 {
        bail!("--max-tokens must be > 0");
    }
    let ids = members.iter().map(String::as_str);

    if let Some(node) = node {
        if !members.iter().any(|m| m == node) {
            bail!("{} is not one of the members", node);
        }
        let range = assign_tokens(ids, node, max_tokens);
        if json {
            println!("{}", serde_json::to_string_pretty(&range)?);
        } else {
            match range {
                Some(range) => println!("{}: {}..={} ({} tokens)", node, range.start, range.end, range.size()),
                None => println!("{}: no tokens", node),
            }
        }
        return Ok(());
    }

    let layout = token_layout(ids, max_tokens);
    if json {
        let entries: Vec<_> = layout
            .iter()
            .map(|(id, range)| serde_json::json!({ "member": id, "range": range }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{:<32} {:>7} {:>7} {:>7}", "MEMBER", "START", "END", "TOKENS");
    for (id, range) in &layout {
        match range {
            Some(range) => println!(
                "{:<32} {:>7} {:>7} {:>7}",
                id,
                range.start,
                range.end,
                range.size()
            ),
            None => println!("{:<32} {:>7} {:>7} {:>7}", id, "-", "-", 0),
        }
    }
    Ok(())
}
