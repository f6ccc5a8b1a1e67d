//! Applies an [`AuthDescriptor`] to a freshly materialized request.

use tracing::trace;

use crate::materializer::MaterializedRequest;
use crate::model::AuthDescriptor;
use crate::model::DEFAULT_API_KEY_HEADER;
use crate::model::Variables;
use crate::substitution::substitute;

const AUTHORIZATION: &str = "Authorization";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Every credential field is substituted first. Headers set explicitly on the
/// template win over bearer and api-key headers; basic credentials are handed
/// to the transport and replace any explicit `Authorization` header there.
pub fn apply(auth: &AuthDescriptor, variables: &Variables, request: &mut MaterializedRequest) {
    match auth {
        AuthDescriptor::None => {}
        AuthDescriptor::Bearer { token } => {
            let token = substitute(token, variables);
            insert_header(request, AUTHORIZATION, format!("Bearer {token}"));
        }
        AuthDescriptor::Basic { username, password } => {
            request.basic_auth = Some(BasicCredentials {
                username: substitute(username, variables),
                password: substitute(password, variables),
            });
        }
        AuthDescriptor::ApiKey {
            key_name,
            key_value,
        } => {
            let mut name = substitute(key_name, variables);
            if name.trim().is_empty() {
                name = DEFAULT_API_KEY_HEADER.to_string();
            }
            insert_header(request, &name, substitute(key_value, variables));
        }
    }
}

fn insert_header(request: &mut MaterializedRequest, name: &str, value: String) {
    if request.has_header(name) {
        trace!(header = name, "template header overrides auth header");
        return;
    }
    request.headers.insert(name.to_string(), value);
}
