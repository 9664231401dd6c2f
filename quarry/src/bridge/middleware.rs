use crate::collection::{Document, Namespace};
use crate::errors::QuarryResult;
use crate::store::command_name;
use std::sync::Arc;
use std::time::Instant;

/// Executes a command against a namespace.
pub type Handler = Arc<dyn Fn(&Namespace, Document) -> QuarryResult<Document> + Send + Sync>;

/// Wraps the next handler, returning the handler that replaces it.
///
/// A middleware may rewrite the command before calling the next handler,
/// rewrite the reply, retry, or answer without calling it at all.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Builds a [Middleware] from a function receiving the namespace, the
/// command and the next handler.
pub fn middleware<F>(wrap: F) -> Middleware
where
    F: Fn(&Namespace, Document, &Handler) -> QuarryResult<Document> + Send + Sync + 'static,
{
    let wrap = Arc::new(wrap);
    Arc::new(move |next: Handler| {
        let wrap = wrap.clone();
        let handler: Handler = Arc::new(move |namespace: &Namespace, command: Document| {
            wrap(namespace, command, &next)
        });
        handler
    })
}

/// Logs every command with its namespace, outcome and duration.
pub fn logging() -> Middleware {
    middleware(|namespace, command, next| {
        let name = command_name(&command).unwrap_or("<empty>").to_string();
        let started = Instant::now();
        let result = next(namespace, command);
        match &result {
            Ok(_) => log::info!("{} on {} succeeded in {:?}", name, namespace, started.elapsed()),
            Err(e) => log::warn!("{} on {} failed in {:?}: {}", name, namespace, started.elapsed(), e),
        }
        result
    })
}

/// Turns failures into `{ok: 0, errmsg, code, codeName}` replies.
///
/// This is a recovery layer: once it is mounted, callers below it in the
/// chain never see an error.
pub fn error_reply() -> Middleware {
    middleware(|namespace, command, next| match next(namespace, command) {
        Ok(reply) => Ok(reply),
        Err(e) => {
            log::warn!("Replying with failure for {}: {}", namespace, e);
            Ok(e.to_document())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::errors::{ErrorKind, QuarryError};

    fn failing() -> Handler {
        Arc::new(|_: &Namespace, _: Document| Err(QuarryError::new("boom", ErrorKind::InvalidOperation)))
    }

    #[test]
    fn test_error_reply_recovers() {
        let handler = error_reply()(failing());
        let reply = handler(&Namespace::new("db", "c"), doc! { find: "c" }).unwrap();
        assert_eq!(reply.get("ok").and_then(|v| v.as_i64()), Some(0));
        assert_eq!(reply.get("codeName").and_then(|v| v.as_str()), Some("IllegalOperation"));
    }

    #[test]
    fn test_logging_passes_errors_through() {
        let handler = logging()(failing());
        let err = handler(&Namespace::new("db", "c"), doc! { find: "c" }).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_middleware_can_rewrite_command() {
        let echo: Handler = Arc::new(|_: &Namespace, command: Document| Ok(command));
        let tag = middleware(|namespace, mut command, next| {
            command.insert("tagged", true);
            next(namespace, command)
        });
        let reply = tag(echo)(&Namespace::new("db", "c"), doc! { find: "c" }).unwrap();
        assert_eq!(reply, doc! { find: "c", tagged: true });
    }
}
