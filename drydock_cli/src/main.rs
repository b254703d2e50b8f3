#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate libc;
extern crate loggerv;

extern crate drydock;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use drydock::factory::FactoryBuilder;
use drydock::kubeapi::ClusterClient;
use drydock::orchestrate::Timeouts;
use drydock::{ClusterSpec, Error, ProviderKind, Result, VersionsBundle};

fn print_error_debug(e: &Error) {
    // unwind the error chain for -v users
    for cause in e.iter().skip(1) {
        warn!("caused by: {}", cause);
    }
}

fn main() {
    let app = App::new("drydock")
        .version(crate_version!())
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .global_settings(&[AppSettings::ColoredHelp])
        .about("Raise clusters from bare metal")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Increase verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .help("Adds line numbers to log statements"))

        .subcommand(SubCommand::with_name("create")
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .about("Create resources")
            .subcommand(SubCommand::with_name("cluster")
                .about("Create a workload cluster from a spec file")
                .arg(Arg::with_name("filename")
                    .short("f")
                    .long("filename")
                    .takes_value(true)
                    .required(true)
                    .help("Cluster spec file"))
                .arg(Arg::with_name("hardware-csv")
                    .long("hardware-csv")
                    .takes_value(true)
                    .help("Bare metal inventory csv (tinkerbell only)"))
                .arg(Arg::with_name("bundles-override")
                    .long("bundles-override")
                    .takes_value(true)
                    .help("Replace the built-in versions bundle wholesale"))
                .arg(Arg::with_name("install-packages")
                    .long("install-packages")
                    .takes_value(true)
                    .help("Curated package manifests applied after create"))
                .arg(Arg::with_name("no-timeouts")
                    .long("no-timeouts")
                    .help("Wait forever instead of the default bounds"))))

        .subcommand(SubCommand::with_name("upgrade")
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .about("Upgrade resources")
            .subcommand(SubCommand::with_name("cluster")
                .about("Reconcile a cluster towards a changed spec file")
                .arg(Arg::with_name("filename")
                    .short("f")
                    .long("filename")
                    .takes_value(true)
                    .required(true)
                    .help("Cluster spec file"))
                .arg(Arg::with_name("no-timeouts")
                    .long("no-timeouts")
                    .help("Wait forever instead of the default bounds"))))

        .subcommand(SubCommand::with_name("delete")
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .about("Delete resources")
            .subcommand(SubCommand::with_name("cluster")
                .about("Delete the cluster a spec file describes")
                .arg(Arg::with_name("filename")
                    .short("f")
                    .long("filename")
                    .takes_value(true)
                    .required(true)
                    .help("Cluster spec file"))))

        .subcommand(SubCommand::with_name("generate")
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .about("Generate starter configuration")
            .subcommand(SubCommand::with_name("clusterconfig")
                .about("Print a starter cluster spec for a provider")
                .arg(Arg::with_name("name")
                    .required(true)
                    .help("Cluster name"))
                .arg(Arg::with_name("provider")
                    .short("p")
                    .long("provider")
                    .takes_value(true)
                    .required(true)
                    .help("Provider kind (docker, vsphere, snow, tinkerbell, cloudstack, nutanix)"))));

    let args = app.get_matches();
    let name = args.subcommand_name().unwrap();
    match run(&args) {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!("{} error: {}", name, e);
            print_error_debug(&e);
            // 1 validation, 2 transient/infra, 3 policy
            process::exit(e.category().exit_code());
        }
    }
}

fn run(args: &ArgMatches) -> Result<()> {
    loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(true)
        .line_numbers(args.is_present("debug"))
        .init()
        .unwrap();
    drydock::init()?;

    // Ignore SIGPIPE errors to avoid having to use let _ = write! everywhere
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    // the gate cache reads the environment once, up front
    debug!(
        "full lifecycle api gate: {}",
        drydock_definitions::features::enabled(drydock_definitions::features::FULL_LIFECYCLE_API)
    );

    let mut rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dispatch_commands(args))
}

/// Dispatch clap arguments to the handlers
async fn dispatch_commands(args: &ArgMatches<'_>) -> Result<()> {
    if let Some(a) = args.subcommand_matches("generate") {
        if let Some(b) = a.subcommand_matches("clusterconfig") {
            let name = b.value_of("name").unwrap();
            let provider = ProviderKind::from_str(b.value_of("provider").unwrap())?;
            let out = drydock::generate::clusterconfig(name, provider)?;
            println!("{}", out);
            return Ok(());
        }
    }

    if let Some(a) = args.subcommand_matches("create") {
        if let Some(b) = a.subcommand_matches("cluster") {
            return create_cluster(b).await;
        }
    }
    if let Some(a) = args.subcommand_matches("upgrade") {
        if let Some(b) = a.subcommand_matches("cluster") {
            return upgrade_cluster(b).await;
        }
    }
    if let Some(a) = args.subcommand_matches("delete") {
        if let Some(b) = a.subcommand_matches("cluster") {
            return delete_cluster(b).await;
        }
    }
    unreachable!("Subcommand valid, but not implemented");
}

fn load_spec(args: &ArgMatches<'_>) -> Result<(PathBuf, ClusterSpec)> {
    let path = PathBuf::from(args.value_of("filename").unwrap());
    let spec = match args.value_of("bundles-override") {
        Some(b) => {
            let bundle = VersionsBundle::from_override_file(Path::new(b))?;
            ClusterSpec::from_file_with_bundle(&path, bundle)?
        }
        None => ClusterSpec::from_file(&path)?,
    };
    Ok((path, spec))
}

fn timeouts_for(args: &ArgMatches<'_>) -> Timeouts {
    if args.is_present("no-timeouts") {
        Timeouts::unbounded()
    } else {
        Timeouts::default()
    }
}

async fn create_cluster(args: &ArgMatches<'_>) -> Result<()> {
    let (spec_path, spec) = load_spec(args)?;
    let catalogue = match args.value_of("hardware-csv") {
        Some(csv) => Some(drydock::Catalogue::from_csv_file(Path::new(csv))?),
        None => None,
    };

    let orchestrator = FactoryBuilder::new()
        .with_timeouts(timeouts_for(args))
        .with_all_providers()
        .with_networking(&spec)
        .with_clusterctl()
        .with_artifact_dir(PathBuf::from("."))
        .build()?;

    let management = ClusterClient::from_env().await?;
    info!("creating cluster {} on {}", spec.name(), spec.provider());

    // keep the spec of record next to the kubeconfig artifact
    let raw_spec = std::fs::read(&spec_path)?;
    orchestrator.writer.write_cluster_spec(spec.name(), &raw_spec)?;

    let kubeconfig = match orchestrator
        .create_workload(&management, &spec, catalogue.as_ref())
        .await
    {
        Ok(k) => k,
        Err(e) => {
            // first fatal error lands on the cluster status, once
            orchestrator.surface_failure(&management, spec.name(), &e).await;
            return Err(e);
        }
    };
    let workload = ClusterClient::for_kubeconfig(&kubeconfig).await?;
    orchestrator.finish_workload_setup(&workload, &spec).await?;

    // self-managed clusters take over their own capi resources
    if spec.cluster.is_self_managed() {
        info!("pivoting management of {} onto itself", spec.name());
        orchestrator
            .move_capi(&management, &workload, None, Some(&kubeconfig))
            .await?;
    }

    if let Some(packages) = args.value_of("install-packages") {
        orchestrator.install_packages(&workload, Path::new(packages)).await?;
    }

    info!("cluster {} is ready; kubeconfig at {}", spec.name(), kubeconfig.display());
    Ok(())
}

async fn upgrade_cluster(args: &ArgMatches<'_>) -> Result<()> {
    let (spec_path, new_spec) = load_spec(args)?;

    let orchestrator = FactoryBuilder::new()
        .with_timeouts(timeouts_for(args))
        .with_all_providers()
        .with_networking(&new_spec)
        .with_clusterctl()
        .with_artifact_dir(PathBuf::from("."))
        .build()?;

    // the spec of record from the last successful operation is the baseline
    let current_path = orchestrator.writer.cluster_spec_path(new_spec.name());
    if !current_path.is_file() {
        return Err(format!(
            "no spec of record at {} - was this cluster created here?",
            current_path.display()
        )
        .into());
    }
    let current = ClusterSpec::from_file(&current_path)?;

    let management = ClusterClient::from_env().await?;
    let kubeconfig = orchestrator.writer.kubeconfig_path(new_spec.name());
    let workload = ClusterClient::for_kubeconfig(&kubeconfig).await?;

    // state snapshot first: failures mid-sequence leave something to restore
    orchestrator.backup_capi(None).await?;

    // single-flighted per cluster; a lone cli invocation never collapses
    let outcome = match orchestrator
        .reconcile_cluster(&management, &workload, &current, &new_spec)
        .await
    {
        Ok(o) => o,
        Err(e) => {
            orchestrator.surface_failure(&management, new_spec.name(), &e).await;
            return Err(e);
        }
    };
    info!("upgrade outcome: {:?}", outcome);

    // the new spec becomes the spec of record
    let raw_spec = std::fs::read(&spec_path)?;
    orchestrator.writer.write_cluster_spec(new_spec.name(), &raw_spec)?;
    Ok(())
}

async fn delete_cluster(args: &ArgMatches<'_>) -> Result<()> {
    let path = PathBuf::from(args.value_of("filename").unwrap());
    let spec = ClusterSpec::from_file(&path)?;

    let orchestrator = FactoryBuilder::new()
        .with_all_providers()
        .with_networking(&spec)
        .with_clusterctl()
        .with_artifact_dir(PathBuf::from("."))
        .build()?;

    let management = ClusterClient::from_env().await?;
    orchestrator.delete_cluster(&management, &spec).await?;
    Ok(())
}
