use std::path::PathBuf;

use crate::config::{self, Config};
use crate::features::Template;

/// Where the installation description comes from.
#[derive(clap::Parser, Clone, Debug)]
#[group(id = "commands::InstallationArgs")]
pub struct InstallationArgs {
    /// Installation configuration file (JSON).
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Installation template to use when no configuration file is given.
    #[arg(long, value_enum, default_value_t = Template::SingleZoneBasic, conflicts_with = "config")]
    template: Template,
}

impl InstallationArgs {
    pub fn load(&self) -> Result<Config, config::Error> {
        match &self.config {
            Some(path) => Config::load(path),
            None => Ok(Config::for_template(self.template)),
        }
    }
}

pub mod registers {
    use crate::features::{self, FeatureSet, Template};
    use crate::output;
    use crate::registers::{Category, Feature, Mode, RegisterIndex, RegisterKind};

    /// Search and output known modbus registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,

        /// Only list registers whose id, description or address contains this text.
        filter: Option<String>,

        /// Only list registers of this kind (`input`, `holding` or `coil`).
        #[arg(long)]
        kind: Option<RegisterKind>,

        /// Only list the registers read for an installation built from this template.
        #[arg(long, value_enum)]
        template: Option<Template>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the register list")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub kind: RegisterKind,
        pub address: u16,
        pub id: &'static str,
        pub mode: Mode,
        pub data_type: String,
        pub category: Category,
        pub feature: Option<Feature>,
        pub minimum: Option<f64>,
        pub maximum: Option<f64>,
        pub unit: &'static str,
        pub labels: Option<&'static [&'static str]>,
        pub description: &'static str,
    }

    impl RegisterSchema {
        pub fn new(register: RegisterIndex) -> Self {
            let data_type = register.data_type();
            Self {
                kind: register.kind(),
                address: register.address(),
                id: register.id(),
                mode: register.mode(),
                data_type: data_type.to_string(),
                category: register.category(),
                feature: register.required_feature(),
                minimum: register.minimum().map(|raw| data_type.to_engineering(raw)),
                maximum: register.maximum().map(|raw| data_type.to_engineering(raw)),
                unit: register.unit(),
                labels: register.labels(),
                description: register.description(),
            }
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_lowercase();
            self.id.contains(&pattern)
                || self.description.to_lowercase().contains(&pattern)
                || self.address.to_string().contains(&pattern)
        }

        fn table_row(&self) -> Vec<String> {
            let bound = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
            vec![
                self.kind.to_string(),
                self.address.to_string(),
                self.id.to_string(),
                self.mode.to_string(),
                self.data_type.clone(),
                self.category.to_string(),
                self.feature.map(|f| f.to_string()).unwrap_or_default(),
                bound(self.minimum),
                bound(self.maximum),
                self.unit.to_string(),
                self.labels.map(|l| l.join(", ")).unwrap_or_default(),
                self.description.to_string(),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let active = args
            .template
            .map(|t| features::active_registers(&FeatureSet::from_template(t, &Default::default())));
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec![
                "Kind",
                "Address",
                "Id",
                "Mode",
                "Type",
                "Category",
                "Feature",
                "Min",
                "Max",
                "Unit",
                "Labels",
                "Description",
            ])
            .map_err(Error::Output)?;
        for register in RegisterIndex::all() {
            if args.kind.is_some_and(|k| k != register.kind()) {
                continue;
            }
            if active.as_ref().is_some_and(|a| !a.contains(register)) {
                continue;
            }
            let schema = RegisterSchema::new(register);
            if let Some(pattern) = &args.filter {
                if !schema.is_match(pattern) {
                    continue;
                }
            }
            output.result(|| schema.table_row(), || &schema).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod read {
    use crate::connection::{self, ModbusTcp};
    use crate::coordinator::{PollCoordinator, RegisterReading};
    use crate::{config, output};
    use tracing::info;

    /// Read every register of the installation once.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        installation: super::InstallationArgs,
        #[clap(flatten)]
        output: output::Args,
        /// Only output registers whose id contains this text.
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the installation configuration")]
        Config(#[source] config::Error),
        #[error("could not output the register values")]
        Output(#[source] output::Error),
        #[error("the device did not respond to any of the {0} reads")]
        NoResponse(usize),
    }

    pub fn status(reading: &RegisterReading) -> String {
        match (reading.reason, reading.stale) {
            (Some(reason), _) => reason.to_string(),
            (None, true) => "stale".to_string(),
            (None, false) => "ok".to_string(),
        }
    }

    pub async fn run(args: Args) -> Result<(), Error> {
        let config = args.installation.load().map_err(Error::Config)?;
        let transport = ModbusTcp::new(args.connection);
        let mut coordinator = PollCoordinator::new(transport, &config).map_err(Error::Config)?;
        let report = coordinator.poll_cycle().await;
        let diagnostics = &report.diagnostics;
        if diagnostics.spans_attempted > 0 && diagnostics.spans_failed == diagnostics.spans_attempted
        {
            return Err(Error::NoResponse(diagnostics.spans_attempted));
        }

        let mut output = args.output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec!["Register", "Value", "Unit", "Raw", "Status"])
            .map_err(Error::Output)?;
        for reading in &report.registers {
            let id = reading.register.id();
            if args.filter.as_ref().is_some_and(|f| !id.contains(f.as_str())) {
                continue;
            }
            output
                .result(
                    || {
                        vec![
                            id.to_string(),
                            reading.value.map(|v| v.to_string()).unwrap_or_default(),
                            reading.register.unit().to_string(),
                            reading.raw.map(|v| v.to_string()).unwrap_or_default(),
                            status(reading),
                        ]
                    },
                    || reading,
                )
                .map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)?;
        for zone in &report.zones {
            match zone.target_flow {
                Some(flow) => info!(message = "zone target", zone = %zone.zone, source = %zone.source, %flow),
                None => info!(message = "zone target unknown", zone = %zone.zone),
            }
        }
        Ok(())
    }
}

pub mod write {
    use crate::config;
    use crate::connection::{self, ModbusTcp};
    use crate::coordinator::{self, PollCoordinator};

    /// Write a single register, then read it back.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        installation: super::InstallationArgs,
        /// The register id, as listed by the `registers` command.
        id: String,
        /// The value in engineering units (`0` or `1` for coils).
        #[arg(allow_negative_numbers = true)]
        value: f64,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the installation configuration")]
        Config(#[source] config::Error),
        #[error("could not write `{1}`")]
        Write(#[source] coordinator::Error, String),
    }

    pub async fn run(args: Args) -> Result<(), Error> {
        let config = args.installation.load().map_err(Error::Config)?;
        let transport = ModbusTcp::new(args.connection);
        let mut coordinator = PollCoordinator::new(transport, &config).map_err(Error::Config)?;
        coordinator
            .write_register(&args.id, args.value)
            .await
            .map_err(|e| Error::Write(e, args.id.clone()))?;
        match coordinator.snapshot().get_id(&args.id).and_then(|e| e.decoded.value) {
            Some(value) => println!("{} = {value}", args.id),
            None => println!("{} written, but could not be read back", args.id),
        }
        Ok(())
    }
}

pub mod poll {
    use std::sync::Arc;

    use crate::compensation::ZoneId;
    use crate::connection::{self, ModbusTcp};
    use crate::coordinator::{self, PollCoordinator, PollReport};
    use crate::{config, output};
    use tokio::sync::watch;

    /// Poll the heat pump continuously, printing a summary of every cycle.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        installation: super::InstallationArgs,
        #[clap(flatten)]
        output: output::Args,
        /// Stop after this many cycles.
        #[arg(long)]
        cycles: Option<u64>,
        /// Switch these zones to their boost curve before the first cycle.
        #[arg(long, value_enum)]
        boost: Vec<ZoneId>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the installation configuration")]
        Config(#[source] config::Error),
        #[error("could not output the poll results")]
        Output(#[source] output::Error),
        #[error("could not boost {1}")]
        Boost(#[source] coordinator::Error, ZoneId),
    }

    fn table_row(report: &PollReport) -> Vec<String> {
        let diagnostics = &report.diagnostics;
        let outdoor = report
            .outdoor
            .as_ref()
            .map(|o| format!("{:.1} ({})", o.celsius, o.source))
            .unwrap_or_default();
        let zones = report
            .zones
            .iter()
            .map(|z| {
                let flow = z.target_flow.map(|f| f.to_string()).unwrap_or_else(|| "?".into());
                match z.boost_remaining {
                    Some(left) => format!(
                        "{}: {flow} ({}, {} left)",
                        z.zone,
                        z.source,
                        humantime::format_duration(left)
                    ),
                    None => format!("{}: {flow} ({})", z.zone, z.source),
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        vec![
            diagnostics.started_at.to_string(),
            diagnostics.cycle.to_string(),
            outdoor,
            zones,
            humantime::format_duration(diagnostics.duration).to_string(),
            diagnostics.spans_failed.to_string(),
            diagnostics.spans_skipped.to_string(),
            diagnostics.valid.to_string(),
            diagnostics.invalid.to_string(),
            diagnostics.stale.to_string(),
        ]
    }

    pub async fn run(args: Args) -> Result<(), Error> {
        let config = args.installation.load().map_err(Error::Config)?;
        let transport = ModbusTcp::new(args.connection);
        let coordinator = PollCoordinator::new(transport, &config).map_err(Error::Config)?;
        let (handle, commands) = coordinator::channel(8);
        let (reports_sender, mut reports) = watch::channel(None::<Arc<PollReport>>);
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec![
                "Time", "Cycle", "Outdoor", "Zones", "Took", "Failed", "Skipped", "Valid",
                "Invalid", "Stale",
            ])
            .map_err(Error::Output)?;

        let (boost, cycles) = (args.boost, args.cycles);
        let printer = async move {
            for zone in boost {
                handle.activate_boost(zone, None).await.map_err(|e| Error::Boost(e, zone))?;
            }
            let mut printed = 0;
            while reports.changed().await.is_ok() {
                let Some(report) = reports.borrow_and_update().clone() else {
                    continue;
                };
                output.result(|| table_row(&report), || &*report).map_err(Error::Output)?;
                output.flush().map_err(Error::Output)?;
                printed += 1;
                if cycles.is_some_and(|c| printed >= c) {
                    break;
                }
            }
            output.commit().map_err(Error::Output)
        };
        tokio::select! {
            () = coordinator.run(commands, reports_sender) => Ok(()),
            result = printer => result,
        }
    }
}

pub mod curve {
    use crate::compensation::{
        CurveError, CurveSelection, FlowTemperature, HeatingCurve, ZoneAdjustment, ZoneId,
    };
    use crate::{config, output};
    use tracing::{info, warn};

    /// Print the flow temperatures a heating curve produces.
    ///
    /// Without `--curve` the curves of the installation configuration are printed.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        #[clap(flatten)]
        installation: super::InstallationArgs,
        /// An ad-hoc curve to evaluate.
        #[arg(
            long,
            num_args = 4,
            value_names = ["MIN_OUTDOOR", "MAX_OUTDOOR", "MIN_FLOW", "MAX_FLOW"],
            allow_negative_numbers = true
        )]
        curve: Option<Vec<f64>>,
        /// Number of points to sample across the outdoor range of each curve.
        #[arg(long, short = 'n', default_value = "11")]
        points: usize,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the installation configuration")]
        Config(#[source] config::Error),
        #[error("the curve is not valid")]
        Curve(#[source] CurveError),
        #[error("could not output the curve")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    struct CurvePoint {
        zone: Option<ZoneId>,
        curve: Option<CurveSelection>,
        outdoor: f64,
        flow: FlowTemperature,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let curves = match args.curve.as_deref() {
            Some(&[min_outdoor, max_outdoor, min_flow, max_flow]) => {
                let curve = HeatingCurve::new(min_outdoor, max_outdoor, min_flow, max_flow)
                    .map_err(Error::Curve)?;
                for advisory in curve.advisories() {
                    warn!(message = "unusual curve", %advisory);
                }
                vec![(None, None, curve, ZoneAdjustment::NONE)]
            }
            _ => {
                let config = args.installation.load().map_err(Error::Config)?;
                let mut curves = Vec::new();
                for (zone, compensation) in config.zone_compensation(&config.feature_set()) {
                    if !compensation.weather_compensation {
                        info!(message = "zone runs at a fixed flow temperature", %zone, flow = compensation.fixed_flow);
                        continue;
                    }
                    for which in [CurveSelection::Primary, CurveSelection::Boost] {
                        curves.push((
                            Some(zone),
                            Some(which),
                            *compensation.curve(which),
                            compensation.adjustment,
                        ));
                    }
                }
                curves
            }
        };

        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(vec!["Zone", "Curve", "Outdoor", "Flow"]).map_err(Error::Output)?;
        for (zone, curve, heating_curve, adjustment) in curves {
            for (outdoor, _) in heating_curve.points(args.points) {
                let flow =
                    FlowTemperature::rounded(adjustment.apply(heating_curve.target_flow(outdoor)));
                let point = CurvePoint { zone, curve, outdoor, flow };
                output
                    .result(
                        || {
                            vec![
                                zone.map(|z| z.to_string()).unwrap_or_default(),
                                curve.map(|c| c.to_string()).unwrap_or_default(),
                                format!("{outdoor:.1}"),
                                flow.to_string(),
                            ]
                        },
                        || &point,
                    )
                    .map_err(Error::Output)?;
            }
        }
        output.commit().map_err(Error::Output)
    }
}
