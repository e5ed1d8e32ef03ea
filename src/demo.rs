//! Root object served by the `tether` binary.

use serde_json::{Value, json};
use tether_core::ApplicationError;
use tether_session::{CallArgs, ExposedMethods, Reply};

/// Build the root object every new session starts with.
///
/// - `echo(value)` returns its argument
/// - `add(a, b)` returns the sum of two numbers
/// - `whoami()` returns the caller's client id
pub fn root() -> ExposedMethods {
    let mut root = ExposedMethods::new();
    let _ = root
        .expose_fn("echo", |args: CallArgs| async move {
            Ok::<_, ApplicationError>(Reply::Value(args.arg(0).cloned().unwrap_or(Value::Null)))
        })
        .expose_fn("add", |args: CallArgs| async move {
            let sum = args.require_f64(0)? + args.require_f64(1)?;
            Ok::<_, ApplicationError>(Reply::Value(json!(sum)))
        })
        .expose_fn("whoami", |args: CallArgs| async move {
            let client_id = args
                .session
                .and_then(|session| session.client_id())
                .ok_or_else(|| ApplicationError::msg("no active session"))?;
            Ok::<_, ApplicationError>(Reply::Value(json!(client_id.as_str())))
        });
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_session::Addressable;

    async fn call(method: &str, positional: Vec<Value>) -> Result<Reply, ApplicationError> {
        let args = CallArgs {
            positional,
            ..CallArgs::default()
        };
        root().locate_method(method).unwrap().invoke(args).await
    }

    #[test]
    fn exposes_demo_methods() {
        assert_eq!(root().methods(), vec!["add", "echo", "whoami"]);
    }

    #[tokio::test]
    async fn echo_returns_argument() {
        let reply = call("echo", vec![json!({"a": [1, 2]})]).await.unwrap();
        assert_eq!(reply, Reply::Value(json!({"a": [1, 2]})));
        assert_eq!(call("echo", vec![]).await.unwrap(), Reply::Value(Value::Null));
    }

    #[tokio::test]
    async fn add_sums_numbers() {
        let reply = call("add", vec![json!(1), json!(2.5)]).await.unwrap();
        assert_eq!(reply, Reply::Value(json!(3.5)));
    }

    #[tokio::test]
    async fn add_rejects_non_numbers() {
        let err = call("add", vec![json!(1), json!("two")]).await.unwrap_err();
        assert_eq!(err.class, "TypeError");
        assert_eq!(err.message, "argument 1 must be a number");
    }

    #[tokio::test]
    async fn whoami_without_session_fails() {
        let err = call("whoami", vec![]).await.unwrap_err();
        assert_eq!(err.message, "no active session");
    }

    #[tokio::test]
    async fn whoami_reports_client_id() {
        use std::sync::Arc;
        use tether_channel::ChannelTimeouts;
        use tether_session::Session;

        let handle = Session::create(Arc::new(root()), ChannelTimeouts::default());
        let activation = handle.activate("/live").await.unwrap();
        let args = CallArgs {
            session: Some(handle),
            ..CallArgs::default()
        };
        let reply = root().locate_method("whoami").unwrap().invoke(args).await.unwrap();
        assert_eq!(reply, Reply::Value(json!(activation.client_id.as_str())));
    }
}
