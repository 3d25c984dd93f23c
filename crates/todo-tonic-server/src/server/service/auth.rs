use todo_tonic_core::client::AUTHORIZATION_HEADER;
use tonic::{Request, Status, service::Interceptor};

/// Opaque identity of the caller, taken verbatim from the `authorization`
/// metadata entry.
///
/// Handlers read it from the request extensions. No credential check is
/// performed beyond presence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal(String);

impl Principal {
    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Runs before every `TodoService` handler.
///
/// When `require` is set, calls without `authorization` metadata are rejected
/// with `Unauthenticated` and never reach the handler.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthInterceptor {
    require: bool,
}

impl AuthInterceptor {
    pub fn new(require: bool) -> Self {
        Self { require }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let principal = match request.metadata().get(AUTHORIZATION_HEADER) {
            Some(value) => {
                let token = value.to_str().map_err(|_| {
                    Status::unauthenticated("authorization metadata is not valid ASCII")
                })?;
                Some(Principal(token.to_string()))
            }
            None => None,
        };

        match principal {
            Some(principal) => {
                request.extensions_mut().insert(principal);
            }
            None if self.require => {
                return Err(Status::unauthenticated("missing authorization metadata"));
            }
            None => {}
        }

        Ok(request)
    }
}
