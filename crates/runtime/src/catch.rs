//! Panic isolation at the plugin boundary.
//!
//! A panicking plugin never kills the runtime: the unwind is caught at
//! the invocation, logged with the plugin id, and handed back as a
//! transient error. Drivers then apply their normal retry policy, and
//! the transform pipeline applies its configured failure mode.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use relay_plugin::PluginError;

/// Run a plugin call, converting a panic into a transient error.
pub async fn catch_plugin_panic<T>(
    plugin_id: &str,
    call: impl Future<Output = Result<T, PluginError>>,
) -> Result<T, PluginError> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(plugin = %plugin_id, panic = %message, "plugin panicked");
            Err(PluginError::transient(format!(
                "plugin '{plugin_id}' panicked: {message}"
            )))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
