use extpanel_channels::FieldInfo;
use extpanel_core::Request;
use serde_json::{Map, Value};

use super::Popup;

/// Values typed on the command line: JSON when it parses, a plain string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn check(popup: &Popup) -> anyhow::Result<()> {
    let resp = popup.call(Request::CheckDynamicsCrm).await?;
    let detected: bool = resp.field("detected")?;
    if detected {
        let version = resp
            .data
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        println!("✓ Dynamics CRM detected (version {})", version);
    } else {
        println!("✗ Dynamics CRM not detected on this page");
    }
    Ok(())
}

pub async fn fields(popup: &Popup) -> anyhow::Result<()> {
    let fields: Vec<FieldInfo> = popup.call(Request::GetDynamicsCrmFields).await?.field("fields")?;
    println!();
    println!("📝 CRM fields ({} total)", fields.len());
    println!();
    for field in &fields {
        let label = field.label.as_deref().unwrap_or("");
        let ro = if field.read_only { " (read-only)" } else { "" };
        println!("  {:<24} {:<10} {:<24} {}{}", field.name, field.kind, label, field.value, ro);
    }
    Ok(())
}

pub async fn set(popup: &Popup, field: &str, value: &str) -> anyhow::Result<()> {
    let resp = popup
        .call(Request::SetDynamicsCrmField {
            field: field.to_string(),
            value: parse_value(value),
        })
        .await?;
    let stored: Value = resp.field("value")?;
    println!("✓ {} = {}", field, stored);
    Ok(())
}

pub async fn fill(popup: &Popup, values: &str) -> anyhow::Result<()> {
    let values: Map<String, Value> = serde_json::from_str(values)
        .map_err(|e| anyhow::anyhow!("values must be a JSON object: {}", e))?;
    let requested = values.len();
    let filled: usize = popup
        .call(Request::FillDynamicsCrmForm { values })
        .await?
        .field("filled")?;
    println!("✓ Filled {} of {} fields", filled, requested);
    Ok(())
}

pub async fn inject(popup: &Popup, script: &str) -> anyhow::Result<()> {
    let result: Value = popup
        .call(Request::ExecuteScript { script: script.to_string() })
        .await?
        .field("result")?;
    println!("✓ Injected {}: {}", script, result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("Contoso Ltd"), json!("Contoso Ltd"));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }
}
