//! REST clients for the verification service and the target-network registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qnet_activation_core::{
    ActivationCredential, BridgeGateway, BridgeHealth, BridgePricing, BridgeResponse,
    BurnFraction, BurnProof, BurnVerification, GatewayError, NetworkPhaseState,
    NetworkStateSource, NodeClass, NodeClassOffer, NodeRegistration, PayerContext, Phase,
    StatusSnapshot, TargetNetwork, TokenGrant,
};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// JSON client that unwraps the `status`/`data` envelope.
#[derive(Debug, Clone)]
struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await.map_err(transport)?;
        decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport(err.to_string())
}

/// Error envelopes are honoured on any HTTP status; anything else on a failure status is
/// treated as a transport problem.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport)?;

    match serde_json::from_slice::<BridgeResponse<T>>(&body) {
        Ok(envelope) => envelope.into_result(),
        Err(err) if status.is_success() => Err(GatewayError::Decode(err.to_string())),
        Err(_) => Err(GatewayError::Transport(format!("HTTP {status}"))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BurnProofBody<'a> {
    source_tx_reference: &'a str,
    amount_burned: u64,
    burner_address: &'a str,
    observed_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayerBody<'a> {
    source_address: &'a str,
    owner_address: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    burn_proof: BurnProofBody<'a>,
    node_class: NodeClass,
    payer: PayerBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    tx_reference: &'a str,
    expected_amount: u64,
    payer_address: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpBridgeGateway {
    rest: RestClient,
}

impl HttpBridgeGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            rest: RestClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl BridgeGateway for HttpBridgeGateway {
    fn gateway_id(&self) -> &'static str {
        "http-bridge"
    }

    async fn request_activation_token(
        &self,
        proof: &BurnProof,
        node_class: NodeClass,
        payer: &PayerContext,
    ) -> Result<ActivationCredential, GatewayError> {
        let request = TokenRequest {
            burn_proof: BurnProofBody {
                source_tx_reference: &proof.source_tx_reference,
                amount_burned: proof.amount_burned,
                burner_address: &proof.burner_address,
                observed_at: proof.observed_at_source_ledger,
            },
            node_class,
            payer: PayerBody {
                source_address: &payer.source_address,
                owner_address: &payer.owner_address,
            },
        };
        let grant: TokenGrant = self.rest.post("/api/v1/activation/token", &request).await?;
        Ok(grant.into_credential())
    }

    async fn verify_burn_transaction(
        &self,
        tx_reference: &str,
        expected_amount: u64,
        payer_address: &str,
    ) -> Result<BurnVerification, GatewayError> {
        let request = VerifyRequest {
            tx_reference,
            expected_amount,
            payer_address,
        };
        self.rest.post("/api/v1/burn/verify", &request).await
    }

    async fn get_activation_status(&self, code: &str) -> Result<StatusSnapshot, GatewayError> {
        self.rest
            .get(&format!("/api/v1/activation/status/{code}"))
            .await
    }

    async fn get_current_pricing(&self, node_class: NodeClass) -> Result<BridgePricing, GatewayError> {
        self.rest
            .get(&format!("/api/v1/pricing/{}", node_class.name()))
            .await
    }

    async fn get_supported_node_classes(&self) -> Result<Vec<NodeClassOffer>, GatewayError> {
        self.rest.get("/api/v1/node-classes").await
    }

    async fn check_health(&self) -> Result<BridgeHealth, GatewayError> {
        self.rest.get("/api/v1/health").await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhaseStateBody {
    burned_fraction: BurnFraction,
    network_age_years: f64,
    network_size: u64,
    #[serde(default)]
    explicit_phase_override: Option<Phase>,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivateRequest<'a> {
    pool_tx_reference: &'a str,
    node_class: NodeClass,
    owner_address: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationBody {
    node_id: String,
    network_tx_reference: String,
}

/// Target-network registry: phase-state observations and the Phase-2 entry point.
#[derive(Debug, Clone)]
pub struct HttpNetworkRegistry {
    rest: RestClient,
}

impl HttpNetworkRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            rest: RestClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl NetworkStateSource for HttpNetworkRegistry {
    async fn fetch_phase_state(&self) -> Result<NetworkPhaseState, GatewayError> {
        let body: PhaseStateBody = self.rest.get("/api/v1/network/phase-state").await?;
        let state = NetworkPhaseState::new(
            body.burned_fraction,
            body.network_age_years,
            body.network_size,
            body.observed_at.unwrap_or_else(Utc::now),
        );
        Ok(match body.explicit_phase_override {
            Some(phase) => state.with_override(phase),
            None => state,
        })
    }
}

#[async_trait]
impl TargetNetwork for HttpNetworkRegistry {
    async fn submit_activation(
        &self,
        pool_tx_reference: &str,
        node_class: NodeClass,
        owner_address: &str,
    ) -> Result<NodeRegistration, GatewayError> {
        let request = ActivateRequest {
            pool_tx_reference,
            node_class,
            owner_address,
        };
        let body: RegistrationBody = self.rest.post("/api/v1/nodes/activate", &request).await?;
        Ok(NodeRegistration {
            node_id: body.node_id,
            network_tx_reference: body.network_tx_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_activation_core::{ActivationStatus, BridgeErrorCode};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpBridgeGateway {
        HttpBridgeGateway::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn health_unwraps_success_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"healthy": true, "sourceChainConnected": true, "targetChainConnected": false}
            })))
            .mount(&server)
            .await;

        let health = gateway(&server).check_health().await.unwrap();
        assert!(health.healthy);
        assert!(!health.is_operational());
    }

    #[tokio::test]
    async fn token_request_sends_proof_and_decodes_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/activation/token"))
            .and(body_partial_json(json!({
                "nodeClass": "full",
                "burnProof": {"sourceTxReference": "0xburn", "amountBurned": 1200},
                "payer": {"sourceAddress": "src", "ownerAddress": "owner"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "credential": "QNET-F1A2B3-C4D5E6-X9Y83K",
                    "nodeClass": "full",
                    "signature": "c2ln",
                    "expiresAt": "2030-01-01T00:00:00Z"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let proof = BurnProof {
            source_tx_reference: "0xburn".to_string(),
            amount_burned: 1_200,
            burner_address: "src".to_string(),
            observed_at_source_ledger: Utc::now(),
        };
        let credential = gateway(&server)
            .request_activation_token(&proof, NodeClass::Full, &PayerContext::new("src", "owner"))
            .await
            .unwrap();

        assert_eq!(credential.code, "QNET-F1A2B3-C4D5E6-X9Y83K");
        assert_eq!(credential.bound_node_class, NodeClass::Full);
        assert_eq!(credential.issuing_authority_signature, "c2ln");
    }

    #[tokio::test]
    async fn error_envelope_maps_to_typed_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/burn/verify"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "status": "error",
                "code": "proof_already_used",
                "message": "burn 0xburn was redeemed"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .verify_burn_transaction("0xburn", 1_200, "src")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                code: BridgeErrorCode::ProofAlreadyUsed,
                message: "burn 0xburn was redeemed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn non_envelope_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/node-classes"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = gateway(&server).get_supported_node_classes().await.unwrap_err();
        assert_eq!(err, GatewayError::Transport("HTTP 502 Bad Gateway".to_string()));
    }

    #[tokio::test]
    async fn malformed_success_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/activation/status/QNET-F1A2B3-C4D5E6-X9Y83K"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"status": "teleported"}
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .get_activation_status("QNET-F1A2B3-C4D5E6-X9Y83K")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn status_and_pricing_routes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/activation/status/QNET-S7K3M9-P2Q4R8-T6V1HG"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"status": "activated", "nodeId": "node-9", "networkTxReference": "0xnet"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/pricing/light"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"amount": 1200, "baseAmount": 1500, "floorAmount": 150, "burnedFraction": 0.25}
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        let snapshot = gateway
            .get_activation_status("QNET-S7K3M9-P2Q4R8-T6V1HG")
            .await
            .unwrap();
        assert_eq!(snapshot.status, ActivationStatus::Activated);
        assert_eq!(snapshot.node_id.as_deref(), Some("node-9"));

        let pricing = gateway.get_current_pricing(NodeClass::Light).await.unwrap();
        assert_eq!(pricing.amount, 1_200);
        assert_eq!(pricing.burned_fraction, BurnFraction::from_ppm(250_000));
    }

    #[tokio::test]
    async fn registry_reads_phase_state_and_submits_activation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/network/phase-state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "burnedFraction": 0.91,
                    "networkAgeYears": 2.5,
                    "networkSize": 120000,
                    "explicitPhaseOverride": 2
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/nodes/activate"))
            .and(body_partial_json(json!({"poolTxReference": "0xpool", "nodeClass": "super"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"nodeId": "super-1", "networkTxReference": "0xreg"}
            })))
            .mount(&server)
            .await;

        let registry = HttpNetworkRegistry::new(&format!("{}/", server.uri()), Duration::from_secs(5))
            .unwrap();
        let state = registry.fetch_phase_state().await.unwrap();
        assert_eq!(state.burned_fraction, BurnFraction::from_ppm(910_000));
        assert_eq!(state.network_size, 120_000);
        assert_eq!(state.explicit_phase_override, Some(Phase::Two));

        let registration = registry
            .submit_activation("0xpool", NodeClass::Super, "owner")
            .await
            .unwrap();
        assert_eq!(registration.node_id, "super-1");
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let gateway =
            HttpBridgeGateway::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            gateway.check_health().await,
            Err(GatewayError::Transport(_))
        ));
    }
}
