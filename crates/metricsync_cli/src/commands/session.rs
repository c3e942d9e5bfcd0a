//! Session commands.

use super::{CommandResult, GlobalArgs};
use metricsync_protocol::User;

fn print_user(user: &User) {
    if user.name.is_empty() {
        println!("{} (id {})", user.username, user.id);
    } else {
        println!("{} <{}> (id {})", user.name, user.username, user.id);
    }
}

/// Shows the user the server considers logged in.
pub async fn whoami(args: &GlobalArgs) -> CommandResult {
    let client = args.connect().await?;
    match client.session().auth().await {
        Ok(user) => print_user(&user),
        Err(e) if e.is_unauthorized() => println!("not logged in"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Logs in and shows the user.
pub async fn login(args: &GlobalArgs) -> CommandResult {
    if args.username.is_none() {
        return Err("login requires --username".into());
    }
    let client = args.connect().await?;
    match client.session().store().state().user {
        Some(user) => print_user(&user),
        None => return Err("login did not return a user".into()),
    }
    Ok(())
}

/// Logs in (if credentials were given) and ends the session.
pub async fn logout(args: &GlobalArgs) -> CommandResult {
    let client = args.connect().await?;
    client.session().logout().await;
    if client.session().store().state().is_authenticated() {
        return Err("logout failed".into());
    }
    println!("logged out");
    Ok(())
}
