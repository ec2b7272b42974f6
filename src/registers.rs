//! Static catalogue of the Grant Aerona3 Modbus registers.
//!
//! The table at the bottom of this file is the only source of truth. It is expanded by
//! `make_lists!` into a number of parallel lists indexed by [`RegisterIndex`].

/// The Modbus object table a register lives in.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegisterKind {
    Input,
    Holding,
    Coil,
}

/// Functional grouping of the registers.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    Basic,
    Dhw,
    Zone,
    External,
    Advanced,
    Diagnostic,
}

/// Optional equipment and functionality an installation may have.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    Zone2,
    DhwCylinder,
    BackupHeater,
    ExternalOutdoorSensor,
    HumiditySensor,
    FlowMetering,
    CirculationPump,
    AdvancedFeatures,
    DiagnosticMonitoring,
}

#[derive(Clone, Copy, Debug, serde::Serialize, PartialEq, Eq)]
pub struct DataType {
    words: u8,
    signed: bool,
    /// Raw value is divided by this to obtain the engineering value.
    scale: u16,
    /// Raw value is multiplied by this to obtain the engineering value.
    gain: u16,
}

impl DataType {
    // Convenience aliases for nicely tabulated `for_each_register` macro definition below.
    pub const BIT: Self = Self {
        words: 1,
        signed: false,
        scale: 1,
        gain: 1,
    };
    pub const U16: Self = Self::BIT;
    pub const I16: Self = Self {
        words: 1,
        signed: true,
        scale: 1,
        gain: 1,
    };
    pub const U32: Self = Self {
        words: 2,
        signed: false,
        scale: 1,
        gain: 1,
    };
    pub const I32: Self = Self {
        words: 2,
        signed: true,
        scale: 1,
        gain: 1,
    };
    /// Tenths of a unit.
    pub const D10: Self = Self {
        words: 1,
        signed: true,
        scale: 10,
        gain: 1,
    };
    /// Tens of a unit.
    pub const X10: Self = Self {
        words: 1,
        signed: false,
        scale: 1,
        gain: 10,
    };
    /// Hundreds of a unit.
    pub const X100: Self = Self {
        words: 1,
        signed: false,
        scale: 1,
        gain: 100,
    };

    pub const fn words(&self) -> u16 {
        self.words as u16
    }
    pub const fn is_signed(&self) -> bool {
        self.signed
    }
    pub const fn scale(&self) -> u16 {
        self.scale
    }
    pub const fn gain(&self) -> u16 {
        self.gain
    }

    /// Combine the words of a register into its raw integer value.
    ///
    /// Multi-word values are big-endian in word order. Returns `None` if there are fewer words
    /// than the data type requires.
    pub fn raw_from_words(self, words: &[u16]) -> Option<i64> {
        match (self.words, self.signed) {
            (1, false) => words.first().map(|w| i64::from(*w)),
            (1, true) => words.first().map(|w| i64::from(*w as i16)),
            (2, signed) => {
                let [hi, lo] = words.first_chunk::<2>()?;
                let combined = (u32::from(*hi) << 16) | u32::from(*lo);
                Some(if signed { i64::from(combined as i32) } else { i64::from(combined) })
            }
            _ => None,
        }
    }

    /// Engineering value of a raw integer.
    pub fn to_engineering(self, raw: i64) -> f64 {
        (raw * i64::from(self.gain)) as f64 / f64::from(self.scale)
    }

    /// Raw integer closest to the engineering value.
    pub fn to_raw(self, value: f64) -> i64 {
        (value * f64::from(self.scale) / f64::from(self.gain)).round() as i64
    }

    /// The single word to put on the wire for a raw value, if it fits.
    pub fn encode_word(self, raw: i64) -> Option<u16> {
        match (self.words, self.signed) {
            (1, false) => u16::try_from(raw).ok(),
            (1, true) => i16::try_from(raw).ok().map(|v| v as u16),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.signed { "i" } else { "u" })?;
        f.write_fmt(format_args!("{}", 16 * self.words))?;
        if self.scale != 1 {
            f.write_fmt(format_args!("/{}", self.scale))?;
        }
        if self.gain != 1 {
            f.write_fmt(format_args!("x{}", self.gain))?;
        }
        Ok(())
    }
}

/// A typed register value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Label(&'static str),
    Flag(bool),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Number(n) => Some(n),
            Value::Flag(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::Label(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::Number(n) => f.write_fmt(format_args!("{}", n)),
            Value::Label(l) => f.write_str(l),
            Value::Flag(b) => f.write_str(if b { "on" } else { "off" }),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::Number(n) => serializer.serialize_f64(n),
            Value::Label(l) => serializer.serialize_str(l),
            Value::Flag(b) => serializer.serialize_bool(b),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Mode(u8);

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0 & Self::R.0 == 0 { "-" } else { "R" })?;
        f.write_str(if self.0 & Self::W.0 == 0 { "-" } else { "W" })?;
        Ok(())
    }
}

impl std::fmt::Debug for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl Mode {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);
    const R_: Self = Self::R;

    pub const fn is_writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub fn from_address(kind: RegisterKind, address: u16) -> Option<RegisterIndex> {
        let range = Self::kind_range(kind);
        let start = range.start;
        let index = start + ADDRESSES[range].partition_point(|v| *v < address);
        (KINDS.get(index) == Some(&kind) && ADDRESSES[index] == address).then_some(Self(index))
    }

    pub fn from_id(id: &str) -> Option<RegisterIndex> {
        let index = IDS.iter().position(|v| *v == id);
        index.map(Self)
    }

    /// Every register in the catalogue, in `(kind, address)` order.
    pub fn all() -> impl Iterator<Item = RegisterIndex> {
        (0..ADDRESSES.len()).map(Self)
    }

    /// Every register of the specified kind, in address order.
    pub fn of_kind(kind: RegisterKind) -> impl Iterator<Item = RegisterIndex> {
        Self::kind_range(kind).map(Self)
    }

    fn kind_range(kind: RegisterKind) -> std::ops::Range<usize> {
        let start = KINDS.partition_point(|k| *k < kind);
        let end = start + KINDS[start..].partition_point(|k| *k == kind);
        start..end
    }

    pub fn kind(&self) -> RegisterKind {
        KINDS[self.0]
    }

    pub fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    /// Last address occupied by this register.
    pub fn end_address(&self) -> u16 {
        self.address() + self.data_type().words() - 1
    }

    pub fn id(&self) -> &'static str {
        IDS[self.0]
    }

    pub fn mode(&self) -> Mode {
        MODES[self.0]
    }

    pub fn is_writable(&self) -> bool {
        self.mode().is_writable()
    }

    pub fn data_type(&self) -> DataType {
        DATA_TYPES[self.0]
    }

    pub fn category(&self) -> Category {
        CATEGORIES[self.0]
    }

    pub fn required_feature(&self) -> Option<Feature> {
        FEATURES[self.0]
    }

    /// Inclusive lower bound of the raw value.
    pub fn minimum(&self) -> Option<i64> {
        MINIMUM_VALUES[self.0]
    }

    /// Inclusive upper bound of the raw value.
    pub fn maximum(&self) -> Option<i64> {
        MAXIMUM_VALUES[self.0]
    }

    /// Ordinal to label mapping for enumerated registers.
    pub fn labels(&self) -> Option<&'static [&'static str]> {
        LABELS[self.0]
    }

    pub fn unit(&self) -> &'static str {
        UNITS[self.0].unwrap_or("")
    }

    pub fn description(&self) -> &'static str {
        DESCRIPTIONS[self.0]
    }

    /// Writes to these registers change how the heat pump runs and are audited.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.id(),
            "zone1_fixed_flow"
                | "zone2_fixed_flow"
                | "dhw_setpoint"
                | "operating_mode"
                | "backup_heater_enable"
        )
    }
}

impl serde::Serialize for RegisterIndex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl std::fmt::Display for RegisterIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            Input 0: I16, R_, "return_temp", Basic, min = -50, max = 100, unit = "°C";
            Input 1: U16, R_, "compressor_frequency", Basic, min = 0, max = 150, unit = "Hz";
            Input 2: I16, R_, "discharge_temp", Basic, min = -50, max = 150, unit = "°C";
            Input 3: X100, R_, "power_consumption", Basic, min = 0, max = 200, unit = "W";
            Input 4: X10, R_, "fan_speed", Basic, unit = "rpm";
            Input 5: I16, R_, "defrost_temp", Basic, min = -50, max = 100, unit = "°C";
            Input 6: I16, R_, "outdoor_temp", Basic, min = -50, max = 60, unit = "°C";
            Input 7: X100, R_, "pump_speed", Basic, unit = "rpm";
            Input 8: I16, R_, "suction_temp", Basic, min = -50, max = 100, unit = "°C";
            Input 9: I16, R_, "flow_temp", Basic, min = -50, max = 100, unit = "°C";
            Input 10: U16, R_, "operating_mode", Basic,
                labels = ["Off", "Heating", "Cooling", "DHW"];
            Input 11: D10, R_, "zone1_setpoint", Zone, min = -500, max = 1000, unit = "°C";
            Input 12: D10, R_, "zone2_setpoint", Zone, feature = Zone2, min = -500, max = 1000,
                unit = "°C";
            Input 13: U16, R_, "dhw_mode", Dhw, feature = DhwCylinder,
                labels = ["Disabled", "Comfort", "Economy", "Force"];
            Input 14: U16, R_, "legionella_day", Dhw, feature = DhwCylinder,
                labels = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday",
                          "Sunday"];
            Input 15: U16, R_, "legionella_time", Dhw, feature = DhwCylinder;
            Input 16: D10, R_, "dhw_temp", Dhw, feature = DhwCylinder, min = -500, max = 1000,
                unit = "°C";
            Input 17: D10, R_, "external_outdoor_temp", External, feature = ExternalOutdoorSensor,
                min = -500, max = 600, unit = "°C";
            Input 18: D10, R_, "buffer_temp", Basic, min = -500, max = 1000, unit = "°C";
            Input 19: D10, R_, "mix_water_temp", Zone, min = -500, max = 1000, unit = "°C";
            Input 20: U16, R_, "humidity", External, feature = HumiditySensor, min = 0, max = 100,
                unit = "%";
            Input 21: U16, R_, "error_code_1", Diagnostic, feature = DiagnosticMonitoring;
            Input 22: U16, R_, "error_code_2", Diagnostic, feature = DiagnosticMonitoring;
            Input 23: U16, R_, "system_runtime", Diagnostic, feature = DiagnosticMonitoring,
                unit = "h";
            Input 24: U16, R_, "compressor_runtime", Diagnostic, feature = DiagnosticMonitoring,
                unit = "h";
            Input 25: U16, R_, "defrost_count", Diagnostic, feature = DiagnosticMonitoring;
            Input 26: U16, R_, "backup_heater_runtime", External, feature = BackupHeater,
                unit = "h";
            Input 27: D10, R_, "flow_rate", Advanced, feature = FlowMetering, min = 0,
                unit = "L/min";
            Input 28: D10, R_, "dhw_flow_rate", Dhw, feature = DhwCylinder, min = 0,
                unit = "L/min";
            Input 32: D10, R_, "plate_hx_temp", Advanced, feature = AdvancedFeatures,
                min = -500, max = 1000, unit = "°C";
            Holding 2: D10, RW, "zone1_fixed_flow", Zone, min = 230, max = 600, unit = "°C";
            Holding 3: D10, RW, "zone1_max_flow", Zone, min = 230, max = 600, unit = "°C";
            Holding 4: D10, RW, "zone1_min_flow", Zone, min = 230, max = 600, unit = "°C";
            Holding 7: D10, RW, "zone2_fixed_flow", Zone, feature = Zone2, min = 230, max = 600,
                unit = "°C";
            Holding 8: D10, RW, "zone2_max_flow", Zone, feature = Zone2, min = 230, max = 600,
                unit = "°C";
            Holding 9: D10, RW, "zone2_min_flow", Zone, feature = Zone2, min = 230, max = 600,
                unit = "°C";
            Holding 26: D10, RW, "dhw_setpoint", Dhw, feature = DhwCylinder, min = 400, max = 650,
                unit = "°C";
            Holding 27: D10, RW, "dhw_hysteresis", Dhw, feature = DhwCylinder, min = 20,
                max = 100, unit = "°C";
            Holding 40: D10, RW, "wc_min_outdoor", Advanced, feature = AdvancedFeatures,
                min = -200, max = 50, unit = "°C";
            Holding 41: D10, RW, "wc_max_outdoor", Advanced, feature = AdvancedFeatures,
                min = 150, max = 250, unit = "°C";
            Holding 50: D10, RW, "backup_heater_setpoint", External, feature = BackupHeater,
                min = -150, max = 50, unit = "°C";
            Coil 2: BIT, RW, "zone1_weather_comp", Zone;
            Coil 3: BIT, RW, "zone2_weather_comp", Zone, feature = Zone2;
            Coil 6: BIT, RW, "anti_legionella", Dhw, feature = DhwCylinder;
            Coil 7: BIT, RW, "control_mode", Basic;
            Coil 8: BIT, RW, "frost_protect_room", Basic;
            Coil 9: BIT, RW, "frost_protect_outdoor", Basic;
            Coil 10: BIT, RW, "frost_protect_water", Basic;
            Coil 15: BIT, RW, "backup_heater_enable", External, feature = BackupHeater;
            Coil 16: BIT, RW, "circulation_pump", External, feature = CirculationPump;
            Coil 20: BIT, RW, "dhw_boost", Dhw, feature = DhwCylinder;
            Coil 21: BIT, RW, "dhw_remote_relay", Dhw, feature = DhwCylinder;
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($kind: ident $address: literal: $dt: ident, $mode: ident, $id: literal, $category: ident
       $(, feature = $feature: ident)?
       $(, min = $min: literal)? $(, max = $max: literal)?
       $(, unit = $unit: literal)?
       $(, labels = [$($label: literal),+ $(,)?])?;)+) => {
        pub static KINDS: &[RegisterKind] = &[$(RegisterKind::$kind),*];
        pub static ADDRESSES: &[u16] = &[$($address),*];
        pub static IDS: &[&str] = &[$($id),*];
        pub static MODES: &[Mode] = &[$(Mode::$mode),*];
        pub static DATA_TYPES: &[DataType] = &[$(DataType::$dt),*];
        pub static CATEGORIES: &[Category] = &[$(Category::$category),*];
        pub static FEATURES: &[Option<Feature>] = &[$(optional!($(Feature::$feature)?)),*];
        pub static MINIMUM_VALUES: &[Option<i64>] = &[$(optional!($($min)?)),*];
        pub static MAXIMUM_VALUES: &[Option<i64>] = &[$(optional!($($max)?)),*];
        pub static UNITS: &[Option<&str>] = &[$(optional!($($unit)?)),*];
        pub static LABELS: &[Option<&[&str]>] = &[$(optional!($(&[$($label),+])?)),*];
    };
}

for_each_register!(make_lists);

pub static DESCRIPTIONS: &[&str] = &const {
    let mut result = [""; ADDRESSES.len()];
    let mut index = 0;
    while index < result.len() {
        let kind = KINDS[index];
        let address = ADDRESSES[index];
        if index > 0 {
            let previous_kind = KINDS[index - 1] as u8;
            let previous_address = ADDRESSES[index - 1];
            if (kind as u8) < previous_kind
                || (kind as u8 == previous_kind && address <= previous_address)
            {
                panic!("the register table is not sorted (or has duplicate addresses)!");
            }
        }
        if DATA_TYPES[index].words == 2 && (address as u32 + 1) > u16::MAX as u32 {
            panic!("a two word register does not fit the address space!");
        }
        result[index] = match (kind, address) {
            (RegisterKind::Input, 0) => "Return water temperature",
            (RegisterKind::Input, 1) => "Compressor operating frequency",
            (RegisterKind::Input, 2) => "Compressor discharge temperature",
            (RegisterKind::Input, 3) => "Current electrical power consumption",
            (RegisterKind::Input, 4) => "Outdoor unit fan speed",
            (RegisterKind::Input, 5) => "Defrost sensor temperature",
            (RegisterKind::Input, 6) => "Outdoor air temperature measured by the unit",
            (RegisterKind::Input, 7) => "Water pump speed",
            (RegisterKind::Input, 8) => "Compressor suction temperature",
            (RegisterKind::Input, 9) => "Outgoing (flow) water temperature",
            (RegisterKind::Input, 10) => "Current operating mode. 0=Off, 1=Heating, 2=Cooling, 3=DHW",
            (RegisterKind::Input, 11) => "Zone 1 set temperature",
            (RegisterKind::Input, 12) => "Zone 2 set temperature",
            (RegisterKind::Input, 13) => {
                "DHW operating mode. 0=Disabled, 1=Comfort, 2=Economy, 3=Force"
            }
            (RegisterKind::Input, 14) => "Day of the week the anti-legionella cycle runs on",
            (RegisterKind::Input, 15) => "Start time of the anti-legionella cycle",
            (RegisterKind::Input, 16) => "DHW cylinder temperature",
            (RegisterKind::Input, 17) => "Outdoor temperature from an external sensor",
            (RegisterKind::Input, 18) => "Buffer tank temperature",
            (RegisterKind::Input, 19) => "Mix water temperature",
            (RegisterKind::Input, 20) => "Relative humidity from the humidity sensor",
            (RegisterKind::Input, 21) => "Most recent error code",
            (RegisterKind::Input, 22) => "Previous error code",
            (RegisterKind::Input, 23) => "Hours the system has been running",
            (RegisterKind::Input, 24) => "Hours the compressor has been running",
            (RegisterKind::Input, 25) => "Number of defrost cycles",
            (RegisterKind::Input, 26) => "Hours the backup heater has been running",
            (RegisterKind::Input, 27) => "Heating circuit flow rate",
            (RegisterKind::Input, 28) => "DHW flow rate",
            (RegisterKind::Input, 32) => "Plate heat exchanger temperature",
            (RegisterKind::Holding, 2) => {
                "Zone 1 flow temperature used when weather compensation is disabled"
            }
            (RegisterKind::Holding, 3) => "Zone 1 maximum flow temperature",
            (RegisterKind::Holding, 4) => "Zone 1 minimum flow temperature",
            (RegisterKind::Holding, 7) => {
                "Zone 2 flow temperature used when weather compensation is disabled"
            }
            (RegisterKind::Holding, 8) => "Zone 2 maximum flow temperature",
            (RegisterKind::Holding, 9) => "Zone 2 minimum flow temperature",
            (RegisterKind::Holding, 26) => "DHW target temperature",
            (RegisterKind::Holding, 27) => "DHW reheat hysteresis",
            (RegisterKind::Holding, 40) => {
                "Outdoor temperature at which the weather compensation curve reaches its \
                 maximum flow temperature"
            }
            (RegisterKind::Holding, 41) => {
                "Outdoor temperature at which the weather compensation curve reaches its \
                 minimum flow temperature"
            }
            (RegisterKind::Holding, 50) => "Outdoor temperature below which the backup heater runs",
            (RegisterKind::Coil, 2) => "Enable weather compensation for zone 1",
            (RegisterKind::Coil, 3) => "Enable weather compensation for zone 2",
            (RegisterKind::Coil, 6) => "Enable the anti-legionella function",
            (RegisterKind::Coil, 7) => "Control mode. 0=Room setpoint, 1=Water setpoint",
            (RegisterKind::Coil, 8) => "Frost protection based on room temperature",
            (RegisterKind::Coil, 9) => "Frost protection based on outdoor temperature",
            (RegisterKind::Coil, 10) => "Frost protection based on water temperature",
            (RegisterKind::Coil, 15) => "Enable backup heater operation",
            (RegisterKind::Coil, 16) => "Enable the circulation pump",
            (RegisterKind::Coil, 20) => "Activate DHW boost",
            (RegisterKind::Coil, 21) => "DHW remote relay control",
            _ => "",
        };
        index += 1;
    }
    result
};
