// ECG Telemetry — BLE Peripheral (Bluedroid GATT server)
//
// Services:
//   0x180D  ECG       — e2fd985e-… characteristic {Read, Write, Notify} + CCCD
//   0x180A  Device Information — Manufacturer Name, Model Number (static)
//
// Advertising carries the name and the ECG service; the scan response carries
// the manufacturer data. Connection events are forwarded to the connection
// state machine, which decides when to re-advertise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::bt::ble::gap::{AdvConfiguration, BleGapEvent, EspBleGap};
use esp_idf_svc::bt::ble::gatt::server::{ConnectionId, EspGatts, GattsEvent, TransferId};
use esp_idf_svc::bt::ble::gatt::{
    AutoResponse, GattCharacteristic, GattDescriptor, GattId, GattInterface, GattServiceId,
    GattStatus, Handle, Permission, Property,
};
use esp_idf_svc::bt::{Ble, BtDriver, BtStatus, BtUuid};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_sys::esp;

use crate::config::*;
use crate::dispatch::Notifier;
use crate::link::{Advertiser, ConnectionCallbacks};

type BleDriver = BtDriver<'static, Ble>;
type Gap = EspBleGap<'static, Ble, Arc<BleDriver>>;
type Gatts = EspGatts<'static, Ble, Arc<BleDriver>>;

const CCCD_NOTIFY: u16 = 0x0001;

// ---------------------------------------------------------------------------
// Radio bring-up
// ---------------------------------------------------------------------------

/// Controller + host stack handles. Create once, then hand out the GAP to the
/// advertiser and both to the GATT server.
pub struct BleStack {
    gap: Arc<Gap>,
    gatts: Arc<Gatts>,
}

impl BleStack {
    pub fn new(modem: Modem, nvs: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let driver = Arc::new(BtDriver::<Ble>::new(modem, Some(nvs)).context("BT controller init failed")?);
        let gap = Arc::new(EspBleGap::new(driver.clone()).context("BLE GAP init failed")?);
        let gatts = Arc::new(EspGatts::new(driver).context("BLE GATT server init failed")?);

        esp!(unsafe { esp_idf_sys::esp_ble_gatt_set_local_mtu(GATT_LOCAL_MTU) })
            .context("set local MTU failed")?;

        log::info!("Bluetooth initialized");
        Ok(Self { gap, gatts })
    }

    pub fn advertiser(&self) -> BleAdvertiser {
        BleAdvertiser {
            gap: self.gap.clone(),
            state: Arc::new(AdvertisingState::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Advertising
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AdvertisingState {
    /// Advertising data accepted by the controller.
    configured: AtomicBool,
    /// `start_advertising` was asked for before the data was accepted.
    requested: AtomicBool,
}

#[derive(Clone)]
pub struct BleAdvertiser {
    gap: Arc<Gap>,
    state: Arc<AdvertisingState>,
}

impl Advertiser for BleAdvertiser {
    fn start_advertising(&mut self) -> anyhow::Result<()> {
        if self.state.configured.load(Ordering::SeqCst) {
            self.gap.start_advertising()?;
        } else {
            // Started from the AdvertisingConfigured event.
            self.state.requested.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl BleAdvertiser {
    fn configure(&self) -> anyhow::Result<()> {
        let mut manufacturer = Vec::with_capacity(2 + MANUFACTURER_NAME.len());
        manufacturer.extend_from_slice(&MANUFACTURER_COMPANY_ID);
        manufacturer.extend_from_slice(MANUFACTURER_NAME.as_bytes());

        self.gap.set_device_name(DEVICE_NAME)?;
        self.gap.set_adv_conf(&AdvConfiguration {
            set_scan_rsp: true,
            manufacturer_data: Some(manufacturer.as_slice()),
            ..Default::default()
        })?;
        self.gap.set_adv_conf(&AdvConfiguration {
            include_name: true,
            include_txpower: false,
            flag: 0x06, // LE general discoverable, BR/EDR not supported
            service_uuid: Some(BtUuid::uuid16(ECG_SERVICE_UUID)),
            ..Default::default()
        })?;
        Ok(())
    }

    fn on_gap_event(&self, event: BleGapEvent) -> anyhow::Result<()> {
        match event {
            BleGapEvent::AdvertisingConfigured(status) => {
                check_bt_status(status)?;
                self.state.configured.store(true, Ordering::SeqCst);
                if self.state.requested.swap(false, Ordering::SeqCst) {
                    self.gap.start_advertising()?;
                }
            }
            BleGapEvent::AdvertisingStarted(status) => {
                check_bt_status(status)?;
                log::info!("Advertising started");
            }
            other => log::debug!("GAP event: {:?}", other),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GATT server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Attributes {
    gatt_if: Option<GattInterface>,
    ecg_service: Option<Handle>,
    ecg_char: Option<Handle>,
    ecg_cccd: Option<Handle>,
    conn: Option<ConnectionId>,
}

pub struct EcgGattServer {
    gatts: Arc<Gatts>,
    advertiser: BleAdvertiser,
    callbacks: Arc<dyn ConnectionCallbacks>,
    attrs: Mutex<Attributes>,
}

impl EcgGattServer {
    /// Subscribe to GAP/GATT events and register the application. Advertising
    /// data is pushed once the app is registered.
    pub fn start(
        stack: &BleStack,
        advertiser: BleAdvertiser,
        callbacks: Arc<dyn ConnectionCallbacks>,
    ) -> anyhow::Result<Arc<Self>> {
        let server = Arc::new(Self {
            gatts: stack.gatts.clone(),
            advertiser,
            callbacks,
            attrs: Mutex::new(Attributes::default()),
        });

        let gap_server = server.clone();
        stack.gap.subscribe(move |event| {
            if let Err(e) = gap_server.advertiser.on_gap_event(event) {
                log::error!("GAP event handling failed: {:?}", e);
            }
        })?;

        let gatts_server = server.clone();
        stack.gatts.subscribe(move |(gatt_if, event)| {
            if let Err(e) = gatts_server.on_gatts_event(gatt_if, event) {
                log::error!("GATT event handling failed: {:?}", e);
            }
        })?;

        stack.gatts.register_app(GATT_APP_ID)?;
        Ok(server)
    }

    fn attrs(&self) -> MutexGuard<'_, Attributes> {
        self.attrs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_gatts_event(&self, gatt_if: GattInterface, event: GattsEvent) -> anyhow::Result<()> {
        match event {
            GattsEvent::ServiceRegistered { status, app_id } => {
                check_gatt_status(status)?;
                if app_id == GATT_APP_ID {
                    self.attrs().gatt_if = Some(gatt_if);
                    self.advertiser.configure()?;
                    self.create_services(gatt_if)?;
                }
            }
            GattsEvent::ServiceCreated {
                status,
                service_handle,
                service_id,
            } => {
                check_gatt_status(status)?;
                self.gatts.start_service(service_handle)?;
                if service_id.id.uuid == BtUuid::uuid16(ECG_SERVICE_UUID) {
                    self.attrs().ecg_service = Some(service_handle);
                    self.add_ecg_characteristic(service_handle)?;
                } else if service_id.id.uuid == BtUuid::uuid16(DEVICE_INFO_SERVICE_UUID) {
                    self.add_device_info(service_handle)?;
                }
            }
            GattsEvent::CharacteristicAdded {
                status,
                attr_handle,
                service_handle,
                char_uuid,
            } => {
                check_gatt_status(status)?;
                if char_uuid == BtUuid::uuid128(ECG_CHAR_UUID) {
                    self.attrs().ecg_char = Some(attr_handle);
                    self.gatts.add_descriptor(
                        service_handle,
                        &GattDescriptor {
                            uuid: BtUuid::uuid16(CCCD_UUID),
                            permissions: Permission::Read | Permission::Write,
                        },
                    )?;
                }
            }
            GattsEvent::DescriptorAdded {
                status,
                attr_handle,
                service_handle,
                descr_uuid,
            } => {
                check_gatt_status(status)?;
                let mut attrs = self.attrs();
                if descr_uuid == BtUuid::uuid16(CCCD_UUID) && attrs.ecg_service == Some(service_handle) {
                    attrs.ecg_cccd = Some(attr_handle);
                    log::info!("ECG service ready");
                }
            }
            GattsEvent::Mtu { conn_id, mtu } => {
                log::info!("MTU for conn {} is {}", conn_id, mtu);
            }
            GattsEvent::PeerConnected { conn_id, .. } => {
                self.attrs().conn = Some(conn_id);
                self.callbacks.on_connect(conn_id);
            }
            GattsEvent::PeerDisconnected { conn_id, reason, .. } => {
                let current = {
                    let mut attrs = self.attrs();
                    let current = attrs.conn == Some(conn_id);
                    if current {
                        attrs.conn = None;
                    }
                    current
                };
                // The CCCD is not bonded; it resets with the link.
                if current {
                    self.callbacks.on_subscription_changed(false);
                }
                self.callbacks.on_disconnect(conn_id, reason as u8);
            }
            GattsEvent::Write {
                conn_id,
                trans_id,
                handle,
                need_rsp,
                value,
                ..
            } => {
                self.on_write(gatt_if, conn_id, trans_id, handle, need_rsp, value)?;
            }
            _ => (),
        }
        Ok(())
    }

    fn create_services(&self, gatt_if: GattInterface) -> anyhow::Result<()> {
        // service + (decl + value) + CCCD
        self.gatts
            .create_service(gatt_if, &primary_service(ECG_SERVICE_UUID), 4)?;
        // service + 2 × (decl + value)
        self.gatts
            .create_service(gatt_if, &primary_service(DEVICE_INFO_SERVICE_UUID), 5)?;
        Ok(())
    }

    fn add_ecg_characteristic(&self, service_handle: Handle) -> anyhow::Result<()> {
        self.gatts.add_characteristic(
            service_handle,
            &GattCharacteristic {
                uuid: BtUuid::uuid128(ECG_CHAR_UUID),
                permissions: Permission::Read | Permission::Write,
                properties: Property::Read | Property::Write | Property::Notify,
                max_len: MAX_ATTR_LEN,
                auto_rsp: AutoResponse::ByGatt,
            },
            &[],
        )?;
        Ok(())
    }

    fn add_device_info(&self, service_handle: Handle) -> anyhow::Result<()> {
        for (uuid, value) in [
            (MANUFACTURER_NAME_CHAR_UUID, MANUFACTURER_NAME),
            (MODEL_NUMBER_CHAR_UUID, MODEL_NUMBER),
        ] {
            self.gatts.add_characteristic(
                service_handle,
                &GattCharacteristic {
                    uuid: BtUuid::uuid16(uuid),
                    permissions: Permission::Read.into(),
                    properties: Property::Read.into(),
                    max_len: value.len(),
                    auto_rsp: AutoResponse::ByGatt,
                },
                value.as_bytes(),
            )?;
        }
        Ok(())
    }

    fn on_write(
        &self,
        gatt_if: GattInterface,
        conn_id: ConnectionId,
        trans_id: TransferId,
        handle: Handle,
        need_rsp: bool,
        value: &[u8],
    ) -> anyhow::Result<()> {
        if self.attrs().ecg_cccd != Some(handle) {
            // Writes to the ECG value itself are answered by the stack.
            return Ok(());
        }

        if value.len() == 2 {
            let cfg = u16::from_le_bytes([value[0], value[1]]);
            self.callbacks
                .on_subscription_changed(cfg & CCCD_NOTIFY != 0);
        } else {
            log::warn!("Malformed CCCD write ({} bytes)", value.len());
        }

        if need_rsp {
            self.gatts
                .send_response(gatt_if, conn_id, trans_id, GattStatus::Ok, None)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notify collaborator
// ---------------------------------------------------------------------------

pub struct BleNotifier {
    server: Arc<EcgGattServer>,
}

impl BleNotifier {
    pub fn new(server: Arc<EcgGattServer>) -> Self {
        Self { server }
    }
}

impl Notifier for BleNotifier {
    fn notify(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let (gatt_if, conn, handle) = {
            let attrs = self.server.attrs();
            match (attrs.gatt_if, attrs.conn, attrs.ecg_char) {
                (Some(g), Some(c), Some(h)) => (g, c, h),
                _ => bail!("ECG characteristic not ready"),
            }
        };
        self.server.gatts.notify(gatt_if, conn, handle, payload)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn primary_service(uuid: u16) -> GattServiceId {
    GattServiceId {
        id: GattId {
            uuid: BtUuid::uuid16(uuid),
            inst_id: 0,
        },
        is_primary: true,
    }
}

fn check_bt_status(status: BtStatus) -> anyhow::Result<()> {
    if !matches!(status, BtStatus::Success) {
        bail!("BT status {:?}", status);
    }
    Ok(())
}

fn check_gatt_status(status: GattStatus) -> anyhow::Result<()> {
    if !matches!(status, GattStatus::Ok) {
        bail!("GATT status {:?}", status);
    }
    Ok(())
}
