use std::{fs, path::PathBuf};

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use serde_json::{Value, json};

/// Writes a starter db.json for mockdb.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Where to write the database
    #[arg(long, default_value = "db.json")]
    path: PathBuf,

    /// Number of users to generate
    #[arg(long, default_value_t = 3)]
    users: u32,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.path.exists() && !args.force {
        bail!("{} already exists, pass --force to overwrite", args.path.display());
    }

    let document = seed(args.users, &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    fs::write(&args.path, serde_json::to_string_pretty(&document)?)?;

    println!("Users: {}", args.users);
    println!("Posts: {}", document["posts"].as_array().map_or(0, Vec::len));
    println!("Wrote {}", args.path.display());

    Ok(())
}

fn seed(users: u32, now: &str) -> Value {
    let users: Vec<Value> = (1..=users)
        .map(|id| {
            json!({
                "id": id,
                "name": format!("User {id}"),
                "email": format!("user{id}@example.com"),
                "password": format!("password{id}"),
                "createdAt": now,
                "updatedAt": now,
            })
        })
        .collect();

    let posts: Vec<Value> = users
        .iter()
        .enumerate()
        .map(|(i, user)| {
            json!({
                "id": i + 1,
                "title": format!("Hello from {}", user["name"].as_str().unwrap_or_default()),
                "userId": user["id"],
                "createdAt": now,
                "updatedAt": now,
            })
        })
        .collect();

    let comments: Vec<Value> = posts
        .iter()
        .enumerate()
        .map(|(i, post)| {
            json!({
                "id": i + 1,
                "body": "First!",
                "postId": post["id"],
                "createdAt": now,
                "updatedAt": now,
            })
        })
        .collect();

    json!({
        "users": users,
        "admin": [{ "id": 1, "role": "owner" }],
        "posts": posts,
        "comments": comments,
        "profile": { "name": "mockdb" },
    })
}
