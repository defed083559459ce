//! Redirect URLs that start a federated login.

use url::Url;

use super::{Sign, Transaction};
use crate::config::Config;
use crate::error::{Error, Result};

/// Identity-provider hint for the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GatewayHint {
    /// Let the gateway list every provider.
    #[default]
    Any,
    /// Route to one provider (`idp_id`).
    Idp(String),
    /// Offer a subset of providers (`idp_ids[]`).
    Idps(Vec<String>),
}

fn standard_sign_path(config: &Config, transaction: &Transaction) -> String {
    format!(
        "/t/{}/{}/{}/{}/new",
        config.tenant_domain,
        config.locale_for(transaction.locale),
        transaction.pkce.state,
        transaction.sign_type
    )
}

fn sso_sign_path(idp_id: &str) -> String {
    format!("/enterprise/{idp_id}/login")
}

fn gateway_root(config: &Config) -> Result<Url> {
    let sub_path = if config.dedicated_server {
        String::new()
    } else {
        format!("/t/{}", config.tenant_domain)
    };
    Ok(Url::parse(&format!("{}{sub_path}/", config.base_url))?)
}

fn append_client_state(url: &mut Url, config: &Config, transaction: &Transaction) {
    url.query_pairs_mut()
        .append_pair("locale", config.locale_for(transaction.locale).as_str())
        .append_pair("client_state", &transaction.pkce.state);
}

fn append_pkce_params(url: &mut Url, config: &Config, transaction: &Transaction) {
    let redirect_uri = transaction
        .redirect_uri
        .as_deref()
        .unwrap_or(&config.default_redirect_uri);
    url.query_pairs_mut()
        .append_pair("scope", &transaction.scope)
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair(
            "code_challenge_method",
            &transaction.pkce.code_challenge_method,
        )
        .append_pair("code_challenge", &transaction.pkce.code_challenge);
}

/// Builds the sign-in/up/invite URL, or the enterprise login URL for SSO.
///
/// # Errors
///
/// Returns [`Error::MissingIdpId`] for an SSO transaction without `idp_id`.
pub fn sign_url(config: &Config, transaction: &Transaction, idp_id: Option<&str>) -> Result<Url> {
    let sso_idp = match (transaction.sign_type, idp_id) {
        (Sign::Sso, None) => return Err(Error::MissingIdpId),
        (Sign::Sso, Some(idp_id)) => Some(idp_id),
        _ => None,
    };
    let path = sso_idp.map_or_else(
        || standard_sign_path(config, transaction),
        sso_sign_path,
    );

    let mut url = Url::parse(&format!("{}{path}", config.base_url))?;
    if sso_idp.is_some() {
        append_client_state(&mut url, config, transaction);
    }
    append_pkce_params(&mut url, config, transaction);
    Ok(url)
}

/// Builds the gateway URL, optionally narrowed to some identity providers.
///
/// # Errors
///
/// Returns an error if the base URL cannot be parsed.
pub fn gateway_sign_url(
    config: &Config,
    transaction: &Transaction,
    hint: &GatewayHint,
) -> Result<Url> {
    let mut url = gateway_root(config)?;
    {
        let mut pairs = url.query_pairs_mut();
        match hint {
            GatewayHint::Any => {}
            GatewayHint::Idp(idp_id) => {
                pairs.append_pair("idp_id", idp_id);
            }
            GatewayHint::Idps(idp_ids) => {
                for idp_id in idp_ids {
                    pairs.append_pair("idp_ids[]", idp_id);
                }
            }
        }
    }
    append_client_state(&mut url, config, transaction);
    append_pkce_params(&mut url, config, transaction);
    Ok(url)
}

/// Builds the universal gateway URL, routed by organization domain or email.
///
/// The organization domain wins when both are given.
///
/// # Errors
///
/// Returns an error if the base URL cannot be parsed.
pub fn universal_gateway_url(
    config: &Config,
    transaction: &Transaction,
    organization_domain: Option<&str>,
    email: Option<&str>,
) -> Result<Url> {
    let mut url = gateway_root(config)?;
    match (organization_domain, email) {
        (Some(domain), _) => {
            url.query_pairs_mut().append_pair("organization", domain);
        }
        (None, Some(email)) => {
            url.query_pairs_mut().append_pair("email", email);
        }
        (None, None) => {}
    }
    append_client_state(&mut url, config, transaction);
    append_pkce_params(&mut url, config, transaction);
    Ok(url)
}
