//! Command handlers. Each returns `Ok(true)` on success and `Ok(false)`
//! after printing a user-facing failure.

use std::io::{self, Write};

use anyhow::{Context as _, Result};
use scrapedeck_core::auth::{guard, post_login_target, GuardDecision, Navigator};
use scrapedeck_core::models::{
    Identity, ScrapeMethod, ScrapeRequest, Selector, UserUpdate, YoutubeScrapeRequest,
};
use scrapedeck_core::utils::{format_size, format_timestamp, truncate_string};
use scrapedeck_core::{ApiError, Config, Console, Outcome};
use serde_json::json;
use tracing::warn;

const GENERIC_FAILURE: &str = "Something went wrong";

const USERS_FORBIDDEN: &str = "Only superadmins can manage users";

/// Maximum width of the file name column
const NAME_COLUMN_WIDTH: usize = 48;

/// Number of links listed by `files show`
const MAX_LINKS_SHOWN: usize = 50;

pub struct Context {
    pub console: Console,
    pub config: Config,
    pub json: bool,
}

/// Tells the operator the session is gone. There is no page to navigate to,
/// so the login boundary is a hint to run `scrapedeck login`.
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, path: &str) {
        if path == scrapedeck_core::auth::LOGIN_PATH {
            eprintln!("Session expired. Run `scrapedeck login` to sign in again.");
        }
    }
}

fn report(outcome: &Outcome) -> bool {
    if let Some(message) = outcome.message() {
        eprintln!("Error: {}", message);
    }
    outcome.success
}

fn report_error(err: &ApiError, fallback: &str) -> bool {
    warn!(error = %err, "Command failed");
    report(&Outcome::from_error(err, fallback))
}

/// Resolve the session and apply the route guard for a protected command.
async fn require_session(ctx: &Context, route: &str) -> Option<Identity> {
    let state = ctx.console.session.resolve_session().await;
    match guard(&state, route) {
        GuardDecision::Render => state.identity().cloned(),
        GuardDecision::Redirect { .. } => {
            eprintln!("Not signed in. Run `scrapedeck login` first.");
            None
        }
        // resolve_session always settles the state
        GuardDecision::Loading => None,
    }
}

/// `require_session` for the users commands, which only superadmins see.
async fn require_superadmin(ctx: &Context) -> Option<Identity> {
    let identity = require_session(ctx, "/admin/users").await?;
    if identity.is_superadmin() {
        Some(identity)
    } else {
        report(&Outcome::failure(USERS_FORBIDDEN));
        None
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn login(ctx: &Context, username: Option<String>) -> Result<bool> {
    let state = ctx.console.session.resolve_session().await;
    if let Some(identity) = state.identity() {
        println!("Already signed in as {} ({}).", identity.username, identity.role.display_name());
        return Ok(true);
    }

    let username = match username.or_else(|| ctx.config.last_username.clone()) {
        Some(last) => {
            let input = prompt(&format!("Username [{}]: ", last))?;
            if input.is_empty() {
                last
            } else {
                input
            }
        }
        None => prompt("Username: ")?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let outcome = ctx.console.session.login(&username, &password).await;
    if !report(&outcome) {
        return Ok(false);
    }

    let mut config = ctx.config.clone();
    config.last_username = Some(username.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    if let Some(identity) = ctx.console.session.identity() {
        println!(
            "Signed in as {} ({}). Continue at {}.",
            username,
            identity.role.display_name(),
            post_login_target(None)
        );
    }
    Ok(true)
}

pub async fn logout(ctx: &Context) -> bool {
    ctx.console.session.resolve_session().await;
    ctx.console.session.logout().await;
    println!("Signed out.");
    true
}

pub async fn whoami(ctx: &Context) -> Result<bool> {
    let Some(identity) = require_session(ctx, "/admin").await else {
        return Ok(false);
    };
    if ctx.json {
        print_json(&identity)?;
    } else {
        println!("{} (id {}, {})", identity.username, identity.id, identity.role.display_name());
    }
    Ok(true)
}

pub async fn list_files(ctx: &Context) -> Result<bool> {
    if require_session(ctx, "/admin").await.is_none() {
        return Ok(false);
    }
    let files = match ctx.console.api.list_files().await {
        Ok(files) => files,
        Err(e) => return Ok(report_error(&e, "Could not load files")),
    };

    if ctx.json {
        print_json(&files)?;
        return Ok(true);
    }
    if files.is_empty() {
        println!("No files yet. Start one with `scrapedeck scrape <url>`.");
        return Ok(true);
    }
    println!("{:<width$}  {:>10}  {}", "NAME", "SIZE", "CREATED", width = NAME_COLUMN_WIDTH);
    for file in &files {
        println!(
            "{:<width$}  {:>10}  {}",
            truncate_string(&file.name, NAME_COLUMN_WIDTH),
            format_size(file.size),
            format_timestamp(file.created_at.as_ref()),
            width = NAME_COLUMN_WIDTH
        );
    }
    Ok(true)
}

pub async fn show_file(ctx: &Context, name: &str) -> Result<bool> {
    if require_session(ctx, &format!("/admin/file/{}", name)).await.is_none() {
        return Ok(false);
    }
    let doc = match ctx.console.api.get_file(name).await {
        Ok(doc) => doc,
        Err(e) => return Ok(report_error(&e, "File not found")),
    };

    if ctx.json {
        print_json(&doc)?;
        return Ok(true);
    }
    println!("Title:       {}", doc.title().unwrap_or("-"));
    println!(
        "Description: {}",
        doc.metadata
            .as_ref()
            .and_then(|m| m.description.as_deref())
            .unwrap_or("-")
    );
    println!("H1:");
    if doc.h1().is_empty() {
        println!("  -");
    }
    for heading in doc.h1() {
        println!("  {}", heading);
    }
    println!("Links: {}   Images: {}", doc.links.len(), doc.images.len());
    for link in doc.links.iter().take(MAX_LINKS_SHOWN) {
        let href = link.get("href").and_then(|v| v.as_str()).unwrap_or_default();
        println!("  {}", href);
    }
    for (key, value) in &doc.extra {
        println!("{}: {}", key, truncate_string(&value.to_string(), 120));
    }
    Ok(true)
}

pub async fn delete_file(ctx: &Context, name: &str) -> Result<bool> {
    if require_session(ctx, "/admin").await.is_none() {
        return Ok(false);
    }
    let confirm = prompt(&format!("\"{}\" will be permanently deleted. Continue? [y/N]: ", name))?;
    if !confirm.eq_ignore_ascii_case("y") {
        println!("Cancelled.");
        return Ok(true);
    }
    match ctx.console.api.delete_file(name).await {
        Ok(()) => {
            println!("Deleted {}.", name);
            Ok(true)
        }
        Err(e) => Ok(report_error(&e, "Delete failed")),
    }
}

/// Parse `name=css` or `name=css@attr`.
fn parse_selector(raw: &str) -> Result<Selector> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Selector '{}' must look like name=css[@attr]", raw))?;
    let (selector, attr) = match rest.rsplit_once('@') {
        Some((selector, attr)) => (selector, attr),
        None => (rest, ""),
    };
    Ok(Selector {
        name: name.trim().to_string(),
        selector: selector.trim().to_string(),
        attr: attr.trim().to_string(),
    })
}

fn print_saved(ctx: &Context, saved: &str) -> Result<()> {
    if ctx.json {
        print_json(&json!({ "success": true, "savedToFile": saved }))
    } else {
        println!("Saved to {}. View it with `scrapedeck files show {}`.", saved, saved);
        Ok(())
    }
}

pub async fn scrape(ctx: &Context, url: &str, static_fetch: bool, selectors: &[String]) -> Result<bool> {
    if require_session(ctx, "/admin/new-scrape").await.is_none() {
        return Ok(false);
    }
    let method = if static_fetch {
        ScrapeMethod::Static
    } else {
        ScrapeMethod::Dynamic
    };
    let request = if selectors.is_empty() {
        ScrapeRequest::general(url, method)
    } else {
        let parsed = selectors
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>>>()?;
        ScrapeRequest::custom(url, method, parsed)
    };

    match ctx.console.api.submit_scrape(request).await {
        Ok(saved) => {
            print_saved(ctx, &saved)?;
            Ok(true)
        }
        Err(e) => Ok(report_error(&e, GENERIC_FAILURE)),
    }
}

pub async fn youtube(ctx: &Context, url: &str, limit: u32) -> Result<bool> {
    if require_session(ctx, "/admin/youtube").await.is_none() {
        return Ok(false);
    }
    let request = YoutubeScrapeRequest {
        url: url.to_string(),
        limit,
    };
    match ctx.console.api.submit_youtube_scrape(request).await {
        Ok(saved) => {
            print_saved(ctx, &saved)?;
            Ok(true)
        }
        Err(e) => Ok(report_error(&e, GENERIC_FAILURE)),
    }
}

pub async fn list_users(ctx: &Context) -> Result<bool> {
    if require_superadmin(ctx).await.is_none() {
        return Ok(false);
    }
    let users = match ctx.console.api.list_users().await {
        Ok(users) => users,
        Err(e) => return Ok(report_error(&e, "Could not load users")),
    };
    if ctx.json {
        print_json(&users)?;
        return Ok(true);
    }
    println!("{:>6}  {:<24}  {}", "ID", "USERNAME", "ROLE");
    for user in &users {
        println!("{:>6}  {:<24}  {}", user.id, truncate_string(&user.username, 24), user.role);
    }
    Ok(true)
}

pub async fn delete_user(ctx: &Context, id: i64) -> Result<bool> {
    let Some(me) = require_superadmin(ctx).await else {
        return Ok(false);
    };
    if me.id == id {
        return Ok(report(&Outcome::failure("You cannot delete your own account")));
    }
    let confirm = prompt(&format!("User {} will be permanently deleted. Continue? [y/N]: ", id))?;
    if !confirm.eq_ignore_ascii_case("y") {
        println!("Cancelled.");
        return Ok(true);
    }
    match ctx.console.api.delete_user(id).await {
        Ok(()) => {
            println!("Deleted user {}.", id);
            Ok(true)
        }
        Err(e) => Ok(report_error(&e, "Delete failed")),
    }
}

pub async fn toggle_role(ctx: &Context, id: i64) -> Result<bool> {
    let Some(me) = require_superadmin(ctx).await else {
        return Ok(false);
    };
    if me.id == id {
        return Ok(report(&Outcome::failure("You cannot change your own role")));
    }
    let users = match ctx.console.api.list_users().await {
        Ok(users) => users,
        Err(e) => return Ok(report_error(&e, "Could not load users")),
    };
    let Some(user) = users.iter().find(|u| u.id == id) else {
        return Ok(report(&Outcome::failure(format!("No user with id {}", id))));
    };
    let new_role = user.role.toggled();
    match ctx.console.api.set_user_role(id, new_role).await {
        Ok(()) => {
            println!("{} is now {}.", user.username, new_role.display_name());
            Ok(true)
        }
        Err(e) => Ok(report_error(&e, "Role update failed")),
    }
}

pub async fn update_user(ctx: &Context, id: i64, username: String, change_password: bool) -> Result<bool> {
    if require_superadmin(ctx).await.is_none() {
        return Ok(false);
    }
    let password = if change_password {
        let password = rpassword::prompt_password("New password: ").context("Failed to read password")?;
        Some(password).filter(|p| !p.is_empty())
    } else {
        None
    };
    let update = UserUpdate { username, password };
    match ctx.console.api.update_user(id, &update).await {
        Ok(()) => {
            println!("Updated user {}.", id);
            Ok(true)
        }
        Err(e) => Ok(report_error(&e, "Update failed")),
    }
}
