//! HTTP Gateway Adapter
//!
//! SOAP-over-HTTP client for the settlement gateway. One POST per
//! operation, per-operation timeouts from [`ProviderConfig`], no retries.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::envelope::{self, Action};
use super::{
    BalanceInfo, ProviderAdapter, ProviderOutcome, StatusReport, TransferReceipt, TransportFault,
};
use crate::config::ProviderConfig;
use crate::idempotency::IdempotencyKey;
use crate::msisdn::Msisdn;

pub struct HttpProviderAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
}

fn transport_fault(e: reqwest::Error) -> TransportFault {
    if e.is_timeout() {
        TransportFault::Timeout
    } else {
        TransportFault::Network(e.to_string())
    }
}

impl HttpProviderAdapter {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        info!(endpoint = %config.endpoint, "Initializing settlement gateway client");

        let client = reqwest::Client::builder()
            .connect_timeout(config.balance_timeout())
            .build()?;

        Ok(Self { config, client })
    }

    /// POST one envelope and return the raw body
    async fn post(
        &self,
        action: Action,
        fields: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, TransportFault> {
        let body = envelope::build_request(action, fields)
            .map_err(|e| TransportFault::Network(e.to_string()))?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", action.as_str())
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(transport_fault)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_fault)?;

        // Some gateways return application errors with a 500 status, so only
        // give up on the body when it is not a response envelope.
        if !status.is_success() && !text.contains(action.response_element()) {
            if envelope::is_html(&text) {
                return Err(TransportFault::HtmlBody);
            }
            return Err(TransportFault::HttpStatus(status.as_u16()));
        }

        debug!(action = action.as_str(), status = status.as_u16(), "Gateway responded");
        Ok(text)
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn check_balance(&self) -> ProviderOutcome<BalanceInfo> {
        let fields = [
            ("Username", self.config.username.as_str()),
            ("Password", self.config.password.as_str()),
            ("DealerMsisdn", self.config.dealer_msisdn.as_str()),
        ];

        match self
            .post(Action::BalanceCheck, &fields, self.config.balance_timeout())
            .await
        {
            Ok(body) => envelope::decode_balance(&body),
            Err(fault) => {
                warn!(error = %fault, "Balance check transport fault");
                ProviderOutcome::TransportFault(fault)
            }
        }
    }

    async fn send_transfer(
        &self,
        key: &IdempotencyKey,
        destination: &Msisdn,
        amount_mb: i64,
    ) -> ProviderOutcome<TransferReceipt> {
        let amount = amount_mb.to_string();
        let fields = [
            ("Username", self.config.username.as_str()),
            ("Password", self.config.password.as_str()),
            ("DealerMsisdn", self.config.dealer_msisdn.as_str()),
            ("Recipient", destination.as_str()),
            ("Amount", amount.as_str()),
            ("ProductCode", self.config.product_code.as_str()),
            ("TransactionId", key.as_str()),
        ];

        match self
            .post(Action::SendTransfer, &fields, self.config.transfer_timeout())
            .await
        {
            Ok(body) => envelope::decode_transfer(&body),
            Err(fault) => {
                warn!(transfer_key = %key, error = %fault, "Send transfer transport fault");
                ProviderOutcome::TransportFault(fault)
            }
        }
    }

    async fn check_status(&self, key: &IdempotencyKey) -> ProviderOutcome<StatusReport> {
        let fields = [
            ("Username", self.config.username.as_str()),
            ("Password", self.config.password.as_str()),
            ("TransactionId", key.as_str()),
        ];

        match self
            .post(Action::StatusCheck, &fields, self.config.status_timeout())
            .await
        {
            Ok(body) => envelope::decode_status(&body),
            Err(fault) => {
                warn!(transfer_key = %key, error = %fault, "Status check transport fault");
                ProviderOutcome::TransportFault(fault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msisdn::PhoneNormalizer;
    use crate::provider::ResponseCategory;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Read headers plus a Content-Length body
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Serve one canned HTTP response, optionally after a delay.
    /// Returns the endpoint URL and a handle yielding the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: String,
        delay: Duration,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;

            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
            request
        });

        (format!("http://{}/dealer", addr), handle)
    }

    fn config(endpoint: String) -> ProviderConfig {
        ProviderConfig {
            endpoint,
            username: "dealer01".to_string(),
            password: "secret".to_string(),
            dealer_msisdn: "233244000111".to_string(),
            product_code: "DATA".to_string(),
            balance_timeout_ms: 500,
            transfer_timeout_ms: 300,
            status_timeout_ms: 500,
        }
    }

    fn destination() -> Msisdn {
        PhoneNormalizer::default().normalize("0267781294").unwrap()
    }

    #[tokio::test]
    async fn test_send_transfer_success() {
        let body = "<Envelope><Body><SendTransferResponse>\
                    <ResponseCode>200</ResponseCode><ResponseMessage>OK</ResponseMessage>\
                    <ProviderRef>PR-7</ProviderRef><TransactionRef>TX-7</TransactionRef>\
                    </SendTransferResponse></Body></Envelope>"
            .to_string();
        let (endpoint, server) = serve_once("200 OK", body, Duration::ZERO).await;

        let adapter = HttpProviderAdapter::new(config(endpoint)).unwrap();
        let key = IdempotencyKey::new("BDL20260101000000000K1").unwrap();
        let outcome = adapter.send_transfer(&key, &destination(), 400).await;

        match outcome {
            ProviderOutcome::Success(receipt) => assert_eq!(receipt.provider_ref, "PR-7"),
            other => panic!("expected success, got {:?}", other),
        }

        let request = server.await.unwrap();
        assert!(request.contains("SOAPAction: SendTransfer") || request.contains("soapaction: SendTransfer"));
        assert!(request.contains("<TransactionId>BDL20260101000000000K1</TransactionId>"));
        assert!(request.contains("<Recipient>233267781294</Recipient>"));
        assert!(request.contains("<Amount>400</Amount>"));
    }

    #[tokio::test]
    async fn test_send_transfer_timeout_is_transport_fault() {
        let (endpoint, _server) =
            serve_once("200 OK", String::new(), Duration::from_secs(2)).await;

        let adapter = HttpProviderAdapter::new(config(endpoint)).unwrap();
        let key = IdempotencyKey::new("BDLTIMEOUT").unwrap();
        let outcome = adapter.send_transfer(&key, &destination(), 400).await;

        assert_eq!(outcome, ProviderOutcome::TransportFault(TransportFault::Timeout));
    }

    #[tokio::test]
    async fn test_html_error_page_is_transport_fault() {
        let body = "<html><body><h1>502 Bad Gateway</h1></body></html>".to_string();
        let (endpoint, _server) = serve_once("502 Bad Gateway", body, Duration::ZERO).await;

        let adapter = HttpProviderAdapter::new(config(endpoint)).unwrap();
        let key = IdempotencyKey::new("BDLHTML").unwrap();

        assert_eq!(
            adapter.check_status(&key).await,
            ProviderOutcome::TransportFault(TransportFault::HtmlBody)
        );
    }

    #[tokio::test]
    async fn test_application_error_with_500_status() {
        let body = "<Envelope><Body><BalanceCheckResponse>\
                    <ResponseCode>301</ResponseCode><ResponseMessage>Bad login</ResponseMessage>\
                    </BalanceCheckResponse></Body></Envelope>"
            .to_string();
        let (endpoint, _server) =
            serve_once("500 Internal Server Error", body, Duration::ZERO).await;

        let adapter = HttpProviderAdapter::new(config(endpoint)).unwrap();
        match adapter.check_balance().await {
            ProviderOutcome::ApplicationError(r) => {
                assert_eq!(r.category, ResponseCategory::BadCredentials)
            }
            other => panic!("expected application error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_fault() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let adapter = HttpProviderAdapter::new(config(format!("http://{}/", addr))).unwrap();
        assert!(matches!(
            adapter.check_balance().await,
            ProviderOutcome::TransportFault(TransportFault::Network(_))
        ));
    }
}
