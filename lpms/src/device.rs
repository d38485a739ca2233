//! Session with one sensor: mode changes, configuration, and live samples

use std::{sync::Arc, time::Duration};

use common::types::{Orientation, Sample};
use tracing::{debug, info, trace, warn};

use crate::{
    command::Command,
    config::{snap_frequency, Configuration, FilterMode, MagnetometerCorrection},
    connection::{Connection, Endpoint},
    error::{LpmsError, LpmsResult},
    fields::{DeviceStatus, OperationOptions, OutputFields},
    layout::Layout,
    packet::Packet,
    transmitter::Transmitter,
};

pub const DEFAULT_SENSOR_ID: u16 = 1;

/// How long to wait for the reply to a command before sending it again
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
/// How long to wait for each frame while reading samples
pub const SAMPLE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    /// Right after connecting, the device may be in any mode
    Unknown,
    Command,
    Stream,
    Sleep,
}

impl DeviceMode {
    fn goto_command(self) -> Option<Command> {
        match self {
            DeviceMode::Unknown => None,
            DeviceMode::Command => Some(Command::GotoCommandMode),
            DeviceMode::Stream => Some(Command::GotoStreamMode),
            DeviceMode::Sleep => Some(Command::GotoSleepMode),
        }
    }
}

/// Reply that ends a command exchange
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Expect {
    Acknowledge,
    /// The device echoes the request's command code with the requested data
    Echo(u16),
}

impl Expect {
    fn matches(self, reply: &Packet) -> bool {
        match self {
            Expect::Acknowledge => reply.is(Command::Acknowledge),
            Expect::Echo(code) => reply.command_code() == code,
        }
    }
}

/// Sends `request` until the expected reply arrives
///
/// There is no limit on the number of attempts. Negative acknowledges, unrelated replies,
/// timeouts and corrupt frames all cause the request to be sent again, any other error is
/// returned.
fn exchange<C: Connection>(
    transmitter: &Transmitter<C>,
    request: &Packet,
    expect: Expect,
) -> LpmsResult<Packet> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if attempt > 1 {
            debug!(?request, attempt, "Resending");
        }

        transmitter.discard_pending()?;
        transmitter.send(request)?;

        match transmitter.receive(COMMAND_TIMEOUT) {
            Ok(reply) if expect.matches(&reply) => return Ok(reply),
            Ok(reply) if reply.is(Command::NegativeAcknowledge) => {
                debug!(?request, "Device rejected command");
            }
            Ok(reply) => {
                warn!(?request, ?reply, "Unexpected reply");
            }
            Err(err) if err.is_recoverable() => {
                debug!(?request, "No usable reply: {err}");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Waits for the next sensor data frame and decodes it according to `layout`
fn read_sample<C: Connection>(
    transmitter: &Transmitter<C>,
    layout: &Layout,
    raw: Option<&mut [u8]>,
) -> LpmsResult<Sample> {
    if let Some(raw) = &raw {
        if raw.len() < layout.raw_data_size() {
            return Err(LpmsError::BufferTooSmall {
                required: layout.raw_data_size(),
                provided: raw.len(),
            });
        }
    }

    let mut packet = loop {
        let packet = transmitter.receive(SAMPLE_TIMEOUT)?;
        if packet.is(Command::GetSensorData) {
            break packet;
        }

        trace!(?packet, "Skipped");
    };

    if packet.payload_len() != layout.frame_size {
        return Err(LpmsError::FrameSizeMismatch {
            expected: layout.frame_size,
            actual: packet.payload_len(),
        });
    }

    let timestamp = packet.read_f32()?;
    let orientation = match layout.quaternion_offset {
        Some(offset) => {
            packet.seek(offset)?;
            packet.read_quaternion()?
        }
        None => Orientation::IDENTITY,
    };

    if let Some(raw) = raw {
        let data = &packet.payload()[layout.raw_data_offset..];
        raw[..data.len()].copy_from_slice(data);
    }

    Ok(Sample {
        timestamp,
        orientation,
    })
}

/// A connection to one sensor
///
/// Operations that issue commands block until the device answers and must not be called
/// concurrently. Samples can be read from another thread through a [`Sampler`].
pub struct Device<E: Endpoint> {
    endpoint: E,
    sensor_id: u16,
    transmitter: Option<Arc<Transmitter<E::Connection>>>,
    mode: DeviceMode,
    config: Configuration,
    layout: Layout,
    needs_resync: bool,
    status: DeviceStatus,
}

impl<E: Endpoint> Device<E> {
    pub fn new(endpoint: E) -> Self {
        Device {
            endpoint,
            sensor_id: DEFAULT_SENSOR_ID,
            transmitter: None,
            mode: DeviceMode::Unknown,
            config: Configuration::default(),
            layout: Layout::default(),
            needs_resync: true,
            status: DeviceStatus::empty(),
        }
    }

    pub fn with_sensor_id(mut self, sensor_id: u16) -> Self {
        self.sensor_id = sensor_id;
        self
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn sensor_id(&self) -> u16 {
        self.sensor_id
    }

    pub fn is_connected(&self) -> bool {
        self.transmitter.is_some()
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Set by every configuration change until [`Self::refresh_configuration`] is called
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn stream_frequency(&self) -> u32 {
        self.config.stream_frequency
    }

    pub fn output_fields(&self) -> OutputFields {
        self.config.output_fields
    }

    pub fn operation_options(&self) -> OperationOptions {
        self.config.operation_options
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.config.filter_mode
    }

    pub fn magnetometer_correction(&self) -> MagnetometerCorrection {
        self.config.magnetometer_correction
    }

    pub fn temporal_filter_alpha(&self) -> f32 {
        self.config.temporal_filter_alpha
    }

    /// Result of the last [`Self::update_status`]
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    #[tracing::instrument(skip(self), fields(endpoint = ?self.endpoint))]
    pub fn connect(&mut self, timeout: Duration) -> LpmsResult<()> {
        if self.is_connected() {
            return Err(LpmsError::AlreadyConnected);
        }

        let connection = self.endpoint.connect(timeout)?;
        self.transmitter = Some(Arc::new(Transmitter::new(connection)));
        self.mode = DeviceMode::Unknown;
        self.needs_resync = true;

        info!("Connected");
        Ok(())
    }

    /// Closes the connection, the session is reset even if closing fails
    pub fn disconnect(&mut self) -> LpmsResult<()> {
        self.mode = DeviceMode::Unknown;
        self.needs_resync = true;

        let Some(transmitter) = self.transmitter.take() else {
            return Ok(());
        };

        info!(endpoint = ?self.endpoint, "Disconnecting");
        transmitter.close()
    }

    #[tracing::instrument(skip(self), fields(current = ?self.mode))]
    pub fn set_mode(&mut self, target: DeviceMode) -> LpmsResult<()> {
        let transmitter = self.transmitter()?;

        let Some(goto_target) = target.goto_command() else {
            return Err(LpmsError::InvalidModeTransition(target));
        };

        if target == self.mode {
            return Ok(());
        }

        // Stream mode can only be left towards command mode
        if matches!(self.mode, DeviceMode::Stream | DeviceMode::Unknown) {
            exchange(
                &transmitter,
                &self.request(Command::GotoCommandMode),
                Expect::Acknowledge,
            )?;
            self.mode = DeviceMode::Command;
        }

        if target != self.mode {
            exchange(&transmitter, &self.request(goto_target), Expect::Acknowledge)?;
            self.mode = target;
        }

        debug!("Entered {target:?} mode");
        Ok(())
    }

    /// Sends a command and waits until the device acknowledges it
    pub fn send_acknowledged(&self, request: &Packet) -> LpmsResult<()> {
        let transmitter = self.transmitter()?;
        exchange(&transmitter, request, Expect::Acknowledge).map(|_| ())
    }

    /// Sends a request and waits for the reply echoing its command
    pub fn send_get(&self, request: &Packet) -> LpmsResult<Packet> {
        let transmitter = self.transmitter()?;
        exchange(&transmitter, request, Expect::Echo(request.command_code()))
    }

    /// Selects the supported frequency closest to `requested` and returns it
    pub fn set_stream_frequency(&mut self, requested: u32) -> LpmsResult<u32> {
        if requested == 0 {
            return Err(LpmsError::OutOfRange {
                name: "stream frequency",
                value: 0.0,
            });
        }

        let transmitter = self.command_transmitter()?;
        let frequency = snap_frequency(requested);

        let mut request = self.request(Command::SetStreamFrequency);
        request.write_u32(frequency)?;
        exchange(&transmitter, &request, Expect::Acknowledge)?;

        self.config.stream_frequency = frequency;
        self.needs_resync = true;
        Ok(frequency)
    }

    pub fn set_output_fields(&mut self, fields: OutputFields) -> LpmsResult<()> {
        let transmitter = self.command_transmitter()?;
        let fields = fields & OutputFields::all();

        let mut request = self.request(Command::SetTransmitData);
        request.write_u32(fields.bits())?;
        exchange(&transmitter, &request, Expect::Acknowledge)?;

        self.config.output_fields = fields;
        self.needs_resync = true;
        Ok(())
    }

    /// Only gyroscope auto calibration and threshold can be switched, each with its own
    /// command
    pub fn set_operation_options(&mut self, options: OperationOptions) -> LpmsResult<()> {
        let transmitter = self.command_transmitter()?;
        let options = options & OperationOptions::all();

        let switches = [
            (
                Command::EnableGyroscopeAutoCalibration,
                OperationOptions::GYROSCOPE_AUTO_CALIBRATION,
            ),
            (
                Command::EnableGyroscopeThreshold,
                OperationOptions::GYROSCOPE_THRESHOLD,
            ),
        ];
        for (command, option) in switches {
            let mut request = self.request(command);
            request.write_bool(options.contains(option))?;
            exchange(&transmitter, &request, Expect::Acknowledge)?;
        }

        self.config.operation_options = options;
        self.needs_resync = true;
        Ok(())
    }

    pub fn set_filter_mode(&mut self, mode: FilterMode) -> LpmsResult<()> {
        let transmitter = self.command_transmitter()?;

        let mut request = self.request(Command::SetFilterMode);
        request.write_u32(mode.raw())?;
        exchange(&transmitter, &request, Expect::Acknowledge)?;

        self.config.filter_mode = mode;
        self.needs_resync = true;
        Ok(())
    }

    pub fn set_magnetometer_correction(
        &mut self,
        correction: MagnetometerCorrection,
    ) -> LpmsResult<()> {
        let transmitter = self.command_transmitter()?;

        let mut request = self.request(Command::SetFilterPreset);
        request.write_u32(correction.raw())?;
        exchange(&transmitter, &request, Expect::Acknowledge)?;

        self.config.magnetometer_correction = correction;
        self.needs_resync = true;
        Ok(())
    }

    /// Weight of the newest raw value in the temporal pre-filter, `1` leaves raw values
    /// unchanged
    pub fn set_temporal_filter_alpha(&mut self, alpha: f32) -> LpmsResult<()> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(LpmsError::OutOfRange {
                name: "temporal filter alpha",
                value: alpha,
            });
        }

        let transmitter = self.command_transmitter()?;

        let mut request = self.request(Command::SetLowPassStrength);
        request.write_f32(alpha)?;
        exchange(&transmitter, &request, Expect::Acknowledge)?;

        self.config.temporal_filter_alpha = alpha;
        self.needs_resync = true;
        Ok(())
    }

    /// Reads the active configuration back from the device and recomputes the sample layout
    pub fn refresh_configuration(&mut self) -> LpmsResult<()> {
        let transmitter = self.command_transmitter()?;
        let get = |command| {
            exchange(
                &transmitter,
                &Packet::new(self.sensor_id, command),
                Expect::Echo(Command::code(command)),
            )
        };

        let word = get(Command::GetConfiguration)?.read_u32()?;

        let raw = get(Command::GetFilterMode)?.read_u32()?;
        let filter_mode = FilterMode::from_raw(raw).ok_or(LpmsError::UnexpectedValue {
            field: "filter mode",
            value: raw,
        })?;

        let raw = get(Command::GetFilterPreset)?.read_u32()?;
        let magnetometer_correction =
            MagnetometerCorrection::from_raw(raw).ok_or(LpmsError::UnexpectedValue {
                field: "magnetometer correction",
                value: raw,
            })?;

        let temporal_filter_alpha = get(Command::GetLowPassStrength)?.read_f32()?;

        self.config.apply_word(word);
        self.config.filter_mode = filter_mode;
        self.config.magnetometer_correction = magnetometer_correction;
        self.config.temporal_filter_alpha = temporal_filter_alpha;

        self.layout = Layout::compute(self.config.output_fields);
        self.needs_resync = false;

        debug!(config = ?self.config, layout = ?self.layout, "Configuration refreshed");
        Ok(())
    }

    pub fn update_status(&mut self) -> LpmsResult<DeviceStatus> {
        let transmitter = self.command_transmitter()?;
        let request = self.request(Command::GetStatus);
        let word = exchange(&transmitter, &request, Expect::Echo(request.command_code()))?
            .read_u32()?;

        self.status = DeviceStatus::from_bits_truncate(word);
        if !self.status.failures().is_empty() {
            warn!(failures = ?self.status.failures(), "Device reports hardware faults");
        }

        Ok(self.status)
    }

    pub fn reset_timestamp(&self) -> LpmsResult<()> {
        let transmitter = self.command_transmitter()?;
        exchange(
            &transmitter,
            &self.request(Command::ResetTimeStamp),
            Expect::Acknowledge,
        )
        .map(|_| ())
    }

    /// Bytes of per field data following the timestamp in each sensor data frame
    pub fn raw_data_size(&self) -> LpmsResult<usize> {
        self.transmitter()?;
        self.clean_layout().map(Layout::raw_data_size)
    }

    /// Decodes the next sample, copying the bytes after the timestamp into `raw` if given
    pub fn read_sample(&self, raw: Option<&mut [u8]>) -> LpmsResult<Sample> {
        let transmitter = self.stream_transmitter()?;
        read_sample(&transmitter, self.clean_layout()?, raw)
    }

    /// A handle for reading samples from another thread
    ///
    /// It keeps decoding with the layout active at the time of this call.
    pub fn sampler(&self) -> LpmsResult<Sampler<E::Connection>> {
        let transmitter = self.stream_transmitter()?;

        Ok(Sampler {
            transmitter,
            layout: *self.clean_layout()?,
        })
    }

    fn request(&self, command: Command) -> Packet {
        Packet::new(self.sensor_id, command)
    }

    fn transmitter(&self) -> LpmsResult<Arc<Transmitter<E::Connection>>> {
        self.transmitter.clone().ok_or(LpmsError::NotConnected)
    }

    fn require_mode(&self, expected: DeviceMode) -> LpmsResult<()> {
        if self.mode != expected {
            return Err(LpmsError::WrongMode {
                expected,
                actual: self.mode,
            });
        }

        Ok(())
    }

    fn command_transmitter(&self) -> LpmsResult<Arc<Transmitter<E::Connection>>> {
        let transmitter = self.transmitter()?;
        self.require_mode(DeviceMode::Command)?;
        Ok(transmitter)
    }

    fn stream_transmitter(&self) -> LpmsResult<Arc<Transmitter<E::Connection>>> {
        let transmitter = self.transmitter()?;
        self.require_mode(DeviceMode::Stream)?;
        Ok(transmitter)
    }

    fn clean_layout(&self) -> LpmsResult<&Layout> {
        if self.needs_resync {
            return Err(LpmsError::StaleConfiguration);
        }

        Ok(&self.layout)
    }
}

/// Reads samples over a session owned by someone else
pub struct Sampler<C> {
    transmitter: Arc<Transmitter<C>>,
    layout: Layout,
}

impl<C: Connection> Sampler<C> {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn read_sample(&self, raw: Option<&mut [u8]>) -> LpmsResult<Sample> {
        read_sample(&self.transmitter, &self.layout, raw)
    }
}
