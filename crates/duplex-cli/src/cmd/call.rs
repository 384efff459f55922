use anyhow::{Context, bail};
use duplex::codec::SharedCodec;
use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Peer address with the selector as its path, e.g. tcp://localhost:4242/Echo.
    /// Unix sockets take the selector as a fragment: unix:///tmp/duplex.sock#Echo
    pub url: String,

    /// Call params: JSON values, key=value pairs or bare strings.
    pub args: Vec<String>,
}

pub async fn run(args: Args, codec: SharedCodec) -> anyhow::Result<()> {
    let (addr, selector) = split_target(&args.url)?;
    let params = parse_params(&args.args);
    tracing::debug!(%addr, %selector, %params, "Calling");

    let peer = duplex::dial(&addr, codec).await?;
    let result = peer.call_into::<Value, _>(&selector, &params).await;
    if let Err(e) = peer.close().await {
        tracing::debug!(error = %e, "Session close failed");
    }
    let (reply, _) = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

/// Splits a call URL into the dial address and the selector.
fn split_target(raw: &str) -> anyhow::Result<(String, String)> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid url: {raw}"))?;
    if let Some(selector) = url.fragment().map(str::to_string) {
        url.set_fragment(None);
        return Ok((url.to_string(), selector));
    }
    if url.scheme() == "unix" {
        bail!("unix urls name the selector as a fragment: unix:///path#Selector");
    }
    let selector = url.path().to_string();
    if selector.is_empty() || selector == "/" {
        bail!("missing selector in {raw}");
    }
    url.set_path("");
    Ok((url.to_string(), selector))
}

/// Builds the params from command-line arguments.
///
/// Each argument is JSON if it parses, a `key=value` pair, or a plain string.
/// Pairs fold into one object. A single value is sent as-is, several as a
/// sequence.
fn parse_params(args: &[String]) -> Value {
    let mut values = Vec::new();
    let mut fields = Map::new();
    for arg in args {
        if let Ok(value) = serde_json::from_str::<Value>(arg) {
            values.push(value);
        } else if let Some((key, value)) = arg.split_once('=') {
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            fields.insert(key.to_string(), value);
        } else {
            values.push(Value::String(arg.clone()));
        }
    }
    if !fields.is_empty() {
        values.push(Value::Object(fields));
    }
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(args: &[&str]) -> Value {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_params(&args)
    }

    #[test]
    fn params_from_arguments() {
        assert_eq!(params(&[]), Value::Null);
        assert_eq!(params(&["42"]), json!(42));
        assert_eq!(params(&["hello"]), json!("hello"));
        assert_eq!(params(&["1", "two", "[3]"]), json!([1, "two", [3]]));
        assert_eq!(
            params(&["name=duplex", "port=4242"]),
            json!({"name": "duplex", "port": 4242})
        );
        assert_eq!(params(&["1", "x=y"]), json!([1, {"x": "y"}]));
    }

    #[test]
    fn targets_split_into_address_and_selector() {
        let (addr, selector) = split_target("tcp://localhost:4242/Echo").unwrap();
        assert_eq!(addr, "tcp://localhost:4242");
        assert_eq!(selector, "/Echo");

        let (addr, selector) = split_target("unix:///tmp/duplex.sock#Echo").unwrap();
        assert_eq!(addr, "unix:///tmp/duplex.sock");
        assert_eq!(selector, "Echo");

        assert!(split_target("unix:///tmp/duplex.sock").is_err());
        assert!(split_target("tcp://localhost:4242").is_err());
    }
}
