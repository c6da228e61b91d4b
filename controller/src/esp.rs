use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals, rmt::RMT},
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use acremote_common::{
    auth, codec,
    config::{IrHardwareConfig, NetworkConfig},
    store::{self, STATE_OFFSET, STATE_RECORD_LEN},
    AcController, AuthConfig, BlockingDelay, GreeAc, RuntimeConfig, StateStore, Storage,
    StorageError,
};

use crate::{form, ir::RmtTransmitter};

const NVS_NAMESPACE: &str = "acremote";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_STATE_KEY: &str = "ac_state";
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const STORAGE_SIZE: usize = STATE_OFFSET + STATE_RECORD_LEN;

type EspController = AcController<GreeAc<RmtTransmitter>, NvsStorage, BlockingDelay>;
type HttpRequest<'r, 'c> = Request<&'r mut EspHttpConnection<'c>>;

#[derive(Clone)]
struct SharedState {
    controller: Arc<Mutex<EspController>>,
    auth: Arc<AuthConfig>,
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

/// State record kept as one NVS blob, standing in for the EEPROM bytes.
struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
    staged: Option<Vec<u8>>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_compiled_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "NVS config loaded: ssid=`{}`, repeat={} x {}ms",
        runtime.network.wifi_ssid, runtime.controller.cmd_repeat, runtime.controller.repeat_gap_ms
    );
    if !runtime.auth.enabled() {
        warn!("no password configured; command endpoint is unauthenticated");
    }

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;
    let transmitter = match init_ir_transmitter(rmt, &runtime.ir) {
        Ok(transmitter) => {
            info!(
                "IR transmitter initialized on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.rmt_channel, runtime.ir.tx_pin, runtime.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            RmtTransmitter::disabled()
        }
    };

    let storage = nvs_store.open_state_storage()?;
    let controller = AcController::new(
        GreeAc::new(transmitter),
        StateStore::open(storage),
        BlockingDelay,
        runtime.controller.clone(),
    );
    info!("restored state {}", codec::encode(controller.state()));

    let wifi =
        connect_wifi(modem, sys_loop, nvs_partition, &runtime.network).context("wifi startup failed")?;

    let shared_state = SharedState {
        controller: Arc::new(Mutex::new(controller)),
        auth: Arc::new(runtime.auth.clone()),
    };
    let server = create_http_server(shared_state, runtime.network.http_port)?;
    info!("HTTP server listening on port {}", runtime.network.http_port);

    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_compiled_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }

    if let Some(user) = option_env!("ACREMOTE_USER") {
        runtime.auth.username = user.to_string();
    }

    if runtime.auth.password.is_empty() {
        if let Some(pass) = option_env!("ACREMOTE_PASS") {
            runtime.auth.password = pass.to_string();
        }
    }
}

fn create_http_server(state: SharedState, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/acremote", Method::Post, move |mut req| {
            if !authorized(&state, &req) {
                return write_unauthorized(req, &state.auth);
            }

            let query = query_string(req.uri()).map(str::to_string);
            let body = match read_request_body(&mut req) {
                Ok(body) => body,
                Err(err) => return write_error(req, 413, &format!("{err:#}")),
            };

            let Some(text) = form::argument(query.as_deref(), &body, form::COMMAND_ARG) else {
                return write_error(req, 400, "Missing 'command' argument");
            };

            let command = codec::decode(&text);
            info!("command `{text}` decoded as {:?}", command.fields());

            let command = match store::validate_command(command) {
                Ok(command) => command,
                Err(err) => {
                    warn!("rejected command `{text}`: {err}");
                    return write_error(req, 400, &err.to_string());
                }
            };

            let report = state
                .controller
                .lock()
                .map_err(|_| anyhow!("controller lock poisoned"))?
                .apply(command);
            info!("command applied: {report:?}");

            write_text(req, 200, "ok")
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/state", Method::Get, move |req| {
            if !authorized(&state, &req) {
                return write_unauthorized(req, &state.auth);
            }

            let encoded = codec::encode(
                state
                    .controller
                    .lock()
                    .map_err(|_| anyhow!("controller lock poisoned"))?
                    .state(),
            );
            write_text(req, 200, &encoded)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
            if !authorized(&state, &req) {
                return write_unauthorized(req, &state.auth);
            }

            let status = state
                .controller
                .lock()
                .map_err(|_| anyhow!("controller lock poisoned"))?
                .status();
            write_json(req, &status)
        })?;
    }

    for (method, name) in [(Method::Get, "GET"), (Method::Post, "POST")] {
        server.fn_handler::<anyhow::Error, _>("/*", method, move |mut req| {
            let uri = req.uri().to_string();
            let (path, query) = uri.split_once('?').unwrap_or((uri.as_str(), ""));
            let body = read_request_body(&mut req).unwrap_or_default();
            let args = form::arguments(Some(query), &body);
            write_text(req, 404, &form::not_found_message(path, name, &args))
        })?;
    }

    Ok(server)
}

fn authorized(state: &SharedState, req: &HttpRequest<'_, '_>) -> bool {
    auth::authorize(&state.auth, req.header("Authorization")).allowed()
}

fn query_string(uri: &str) -> Option<&str> {
    uri.split_once('?').map(|(_, query)| query)
}

fn read_request_body(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > form::MAX_REQUEST_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_text(req: HttpRequest<'_, '_>, status_code: u16, body: &str) -> anyhow::Result<()> {
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "text/plain; charset=utf-8")],
    )?
    .write_all(body.as_bytes())?;
    Ok(())
}

fn write_json<T: Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_unauthorized(req: HttpRequest<'_, '_>, auth_config: &AuthConfig) -> anyhow::Result<()> {
    let challenge = auth::challenge(auth_config);
    req.into_response(
        401,
        None,
        &[
            ("Content-Type", "text/plain; charset=utf-8"),
            ("WWW-Authenticate", challenge.as_str()),
        ],
    )?
    .write_all(b"Authentication required")?;
    Ok(())
}

fn init_ir_transmitter(rmt: RMT, ir: &IrHardwareConfig) -> anyhow::Result<RmtTransmitter> {
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let carrier_khz = ir.carrier_khz;

    match ir.rmt_channel {
        0 => unsafe { RmtTransmitter::new(rmt.channel0, AnyOutputPin::new(pin), carrier_khz) },
        1 => unsafe { RmtTransmitter::new(rmt.channel1, AnyOutputPin::new(pin), carrier_khz) },
        2 => unsafe { RmtTransmitter::new(rmt.channel2, AnyOutputPin::new(pin), carrier_khz) },
        3 => unsafe { RmtTransmitter::new(rmt.channel3, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { RmtTransmitter::new(rmt.channel4, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { RmtTransmitter::new(rmt.channel5, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { RmtTransmitter::new(rmt.channel6, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { RmtTransmitter::new(rmt.channel7, AnyOutputPin::new(pin), carrier_khz) },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi ssid not configured"));
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    // keep retrying until the network comes up, with a pause every few attempts
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.wrapping_add(1);
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt} failed: {err:#}");
                let _ = wifi.disconnect();
                let pause = if attempt % WIFI_CONNECT_ATTEMPTS == 0 {
                    WIFI_RETRY_DELAY_MS * 10
                } else {
                    WIFI_RETRY_DELAY_MS
                };
                thread::sleep(Duration::from_millis(pause));
            }
        }
    }

    if let Ok(ip_info) = wifi.wifi().sta_netif().get_ip_info() {
        info!("IP address: {}", ip_info.ip);
    }

    drop(wifi);
    Ok(esp_wifi)
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }

    fn open_state_storage(&self) -> anyhow::Result<NvsStorage> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .context("failed to open state namespace")?;
        Ok(NvsStorage { nvs, staged: None })
    }
}

impl NvsStorage {
    fn read_image(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let mut buffer = [0_u8; 64];
        match self.nvs.get_blob(NVS_STATE_KEY, &mut buffer) {
            Ok(Some(bytes)) => {
                let mut image = bytes.to_vec();
                image.resize(STORAGE_SIZE, 0xFF);
                Ok(Some(image))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(StorageError::Read(format!("{err:?}"))),
        }
    }
}

impl Storage for NvsStorage {
    fn read(&mut self, offset: usize, len: usize) -> Result<Option<Vec<u8>>, StorageError> {
        check_bounds(offset, len)?;
        Ok(self
            .read_image()?
            .map(|image| image[offset..offset + len].to_vec()))
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len())?;
        if self.staged.is_none() {
            let image = self
                .read_image()
                .map_err(|err| StorageError::Write(err.to_string()))?
                .unwrap_or_else(|| vec![0xFF; STORAGE_SIZE]);
            self.staged = Some(image);
        }
        if let Some(image) = self.staged.as_mut() {
            image[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let Some(image) = self.staged.as_ref() else {
            return Ok(());
        };
        self.nvs
            .set_blob(NVS_STATE_KEY, image)
            .map_err(|err| StorageError::Commit(format!("{err:?}")))
    }
}

fn check_bounds(offset: usize, len: usize) -> Result<(), StorageError> {
    if offset.saturating_add(len) > STORAGE_SIZE {
        return Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity: STORAGE_SIZE,
        });
    }
    Ok(())
}
