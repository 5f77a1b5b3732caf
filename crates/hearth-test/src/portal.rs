use hearth_core::PortalSettings;

/// Helper for testing against a fake portal using wiremock.
///
/// Both the account portal and the device-control API are served from the
/// same mock server; the returned settings point every component at it.
///
/// Warning: when using `Mock::expect` ensure `server` is not dropped before
/// the test completes.
pub async fn start_portal_mock(mocks: Vec<wiremock::Mock>) -> (wiremock::MockServer, PortalSettings) {
    let server = wiremock::MockServer::start().await;

    for mock in mocks {
        server.register(mock).await;
    }

    let settings = PortalSettings {
        portal_url: server.uri(),
        api_url: server.uri(),
        user_agent: "test-agent".to_string(),
        ..PortalSettings::default()
    };

    (server, settings)
}
