use serde::{Deserialize, Serialize};

/// Basic client behavior settings. These settings specify the various targets
/// and versions used by the client, and are shared by every component that
/// talks to the portal.
///
/// Defaults to the production portal endpoints.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct PortalSettings {
    /// The account portal serving the HTML login pages. Defaults to
    /// `https://account.hearthportal.com`.
    pub portal_url: String,
    /// The device-control API exchanging tokens and serving device state.
    /// Defaults to `https://api.hearthportal.com`.
    pub api_url: String,
    /// The user agent sent on every request.
    pub user_agent: String,
    /// Application name reported during device registration.
    pub app_name: String,
    /// Application version reported during device registration.
    pub app_version: String,
    /// Device type identifier this client registers itself as.
    pub device_type: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            portal_url: "https://account.hearthportal.com".into(),
            api_url: "https://api.hearthportal.com".into(),
            user_agent: format!("Hearth/{}", env!("CARGO_PKG_VERSION")),
            app_name: "HearthClient".into(),
            app_version: "2.2.663733.0".into(),
            device_type: "HRTHVIRT0001".into(),
        }
    }
}
