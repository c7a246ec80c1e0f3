use extpanel_core::{PermissionName, PermissionSet, Request};

use super::Popup;

fn render(perms: &PermissionSet) {
    println!();
    println!("🔐 Permissions");
    println!();
    for name in PermissionName::ALL {
        let state = if perms.get(name) { "✓ granted" } else { "✗ not granted" };
        let note = if name.is_required() { "  (required)" } else { "" };
        println!("  {:<16} {}{}", name, state, note);
    }
    println!();
}

pub async fn list(popup: &Popup) -> anyhow::Result<()> {
    let perms: PermissionSet = popup.call(Request::GetPermissions).await?.field("permissions")?;
    render(&perms);
    Ok(())
}

pub async fn toggle(popup: &Popup, name: &str) -> anyhow::Result<()> {
    let permission: PermissionName = name.parse()?;
    let perms: PermissionSet = popup
        .call(Request::TogglePermission { permission })
        .await?
        .field("permissions")?;
    render(&perms);
    Ok(())
}

pub async fn request(popup: &Popup, name: &str) -> anyhow::Result<()> {
    let permission: PermissionName = name.parse()?;
    println!("⏳ Requesting {}...", permission);
    let perms: PermissionSet = popup
        .call(Request::RequestPermission { permission })
        .await?
        .field("permissions")?;
    println!("✓ {} granted", permission);
    render(&perms);
    Ok(())
}
