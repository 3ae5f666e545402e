//! Command line front-end for the marrow solver.
//!
//! Reads DIMACS CNF or WCNF input. CNF instances are solved for satisfiability; WCNF instances
//! are turned into an optimization problem by relaxing each soft clause with a fresh 0/1
//! variable that carries the clause weight in the objective.
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Error};
use clap::{App, Arg};

use marrow::integer::IntVar;
use marrow::optimize::LinearFunction;
use marrow::{Lit, Solver, SolverConfig};
use marrow_dimacs::WcnfParser;

fn config_args<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("restart-strategy")
            .long("restart-strategy")
            .takes_value(true)
            .possible_values(&["glucose", "luby", "constant"])
            .help("Restart strategy of the search loop"),
    )
    .arg(
        Arg::with_name("restart-multiplication-coefficient")
            .long("restart-multiplication-coefficient")
            .takes_value(true)
            .help("Conflict budget multiplier for Luby and constant restarts"),
    )
    .arg(
        Arg::with_name("num-min-conflicts-per-restart")
            .long("num-min-conflicts-per-restart")
            .takes_value(true)
            .help("Minimum number of conflicts between restarts"),
    )
    .arg(
        Arg::with_name("glucose-queue-lbd-limit")
            .long("glucose-queue-lbd-limit")
            .takes_value(true)
            .help("Window of the fast LBD moving average"),
    )
    .arg(
        Arg::with_name("glucose-queue-reset-limit")
            .long("glucose-queue-reset-limit")
            .takes_value(true)
            .help("Window of the trail length moving average"),
    )
    .arg(
        Arg::with_name("decay-factor-learned-clause")
            .long("decay-factor-learned-clause")
            .takes_value(true)
            .help("Clause activity decay per conflict"),
    )
    .arg(
        Arg::with_name("lbd-threshold")
            .long("lbd-threshold")
            .takes_value(true)
            .help("LBD boundary between the low-LBD and temporary clause tiers"),
    )
    .arg(
        Arg::with_name("limit-num-temporary-clauses")
            .long("limit-num-temporary-clauses")
            .takes_value(true)
            .help("Target cap of the temporary clause pool"),
    )
    .arg(
        Arg::with_name("lbd-sorting-temporary-clauses")
            .long("lbd-sorting-temporary-clauses")
            .takes_value(true)
            .possible_values(&["true", "false"])
            .help("Sort the temporary pool by LBD instead of activity"),
    )
    .arg(
        Arg::with_name("garbage-tolerance-factor")
            .long("garbage-tolerance-factor")
            .takes_value(true)
            .help("Deleted-space ratio that triggers garbage collection"),
    )
    .arg(
        Arg::with_name("decay-factor-variables")
            .long("decay-factor-variables")
            .takes_value(true)
            .help("VSIDS activity decay per conflict"),
    )
    .arg(
        Arg::with_name("bump-decision-variables")
            .long("bump-decision-variables")
            .takes_value(true)
            .possible_values(&["true", "false"])
            .help("Give decision variables in learned clauses an extra bump"),
    )
    .arg(
        Arg::with_name("clause-minimisation")
            .long("clause-minimisation")
            .takes_value(true)
            .possible_values(&["true", "false"])
            .help("Minimize learned clauses by self-subsumption"),
    )
    .arg(
        Arg::with_name("ub-propagator")
            .long("ub-propagator")
            .takes_value(true)
            .possible_values(&["true", "false"])
            .help("Enforce the objective bound with a propagator instead of an encoding"),
    )
    .arg(
        Arg::with_name("varying-resolution")
            .long("varying-resolution")
            .takes_value(true)
            .possible_values(&["off", "basic", "ratio"])
            .help("Varying-resolution strategy of the upper-bound search"),
    )
    .arg(
        Arg::with_name("value-selection")
            .long("value-selection")
            .takes_value(true)
            .possible_values(&[
                "phase-saving",
                "solution-guided-search",
                "optimistic",
                "optimistic-aux",
            ])
            .help("Value selection during the upper-bound search"),
    )
    .arg(
        Arg::with_name("stratification")
            .long("stratification")
            .takes_value(true)
            .possible_values(&["off", "basic", "ratio"])
            .help("Stratification strategy of the lower-bound search"),
    )
    .arg(
        Arg::with_name("cardinality-encoding")
            .long("cardinality-encoding")
            .takes_value(true)
            .possible_values(&["totaliser", "cardinality-network"])
            .help("Cardinality encoding used to reformulate cores"),
    )
    .arg(
        Arg::with_name("weight-aware-core-extraction")
            .long("weight-aware-core-extraction")
            .takes_value(true)
            .possible_values(&["true", "false"])
            .help("Keep extracting cores under the active weight threshold"),
    )
}

fn parse_config(matches: &clap::ArgMatches) -> Result<SolverConfig, Error> {
    let mut config = SolverConfig::default();

    macro_rules! set {
        ($field:ident, $name:expr) => {
            if let Some(value) = matches.value_of($name) {
                config.$field = value
                    .parse()
                    .map_err(|err| anyhow!("invalid value for {}: {:?}", $name, err))?;
            }
        };
    }

    set!(restart_strategy, "restart-strategy");
    set!(
        restart_coefficient,
        "restart-multiplication-coefficient"
    );
    set!(
        num_min_conflicts_per_restart,
        "num-min-conflicts-per-restart"
    );
    set!(glucose_queue_lbd_limit, "glucose-queue-lbd-limit");
    set!(glucose_queue_reset_limit, "glucose-queue-reset-limit");
    set!(clause_activity_decay, "decay-factor-learned-clause");
    set!(lbd_threshold, "lbd-threshold");
    set!(limit_num_temporary_clauses, "limit-num-temporary-clauses");
    set!(
        lbd_sorting_temporary_clauses,
        "lbd-sorting-temporary-clauses"
    );
    set!(garbage_tolerance_factor, "garbage-tolerance-factor");
    set!(vsids_decay, "decay-factor-variables");
    set!(bump_decision_variables, "bump-decision-variables");
    set!(clause_minimization, "clause-minimisation");
    set!(ub_propagator, "ub-propagator");
    set!(varying_resolution, "varying-resolution");
    set!(value_selection, "value-selection");
    set!(stratification, "stratification");
    set!(cardinality_encoding, "cardinality-encoding");
    set!(
        weight_aware_core_extraction,
        "weight-aware-core-extraction"
    );

    Ok(config)
}

fn is_wcnf(path: &Path) -> Result<bool, Error> {
    use io::BufRead;

    let reader = io::BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.starts_with('p') {
            return Ok(trimmed.starts_with("p wcnf"));
        }
        if !trimmed.is_empty() && !trimmed.starts_with('c') {
            break;
        }
    }
    Ok(false)
}

fn solve_cnf(path: &Path, config: SolverConfig, time_limit: Option<Duration>) -> Result<i32, Error> {
    let mut solver = Solver::with_config(config);
    solver.add_dimacs_cnf(File::open(path)?)?;

    let var_count = {
        use io::BufRead;
        let reader = io::BufReader::new(File::open(path)?);
        let mut count = 0usize;
        for line in reader.lines() {
            let line = line?;
            if let Some(rest) = line.trim().strip_prefix("p cnf ") {
                count = rest
                    .split_whitespace()
                    .next()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(0);
                break;
            }
        }
        count
    };

    let output = solver.solve_with_assumptions(&[], time_limit);

    log::info!(
        "conflicts: {} decisions: {} propagations: {} restarts: {}",
        solver.stats().conflicts,
        solver.stats().decisions,
        solver.stats().propagations,
        solver.stats().restarts,
    );
    println!("c runtime: {:.3}s", output.runtime.as_secs_f64());

    if output.timeout {
        println!("s UNKNOWN");
        return Ok(0);
    }

    if output.has_solution() {
        println!("s SATISFIABLE");
        let mut line = String::from("v");
        for index in 0..var_count {
            let lit = Lit::from_index(index, true);
            let value = solver.model_value(lit).unwrap_or(false);
            line.push_str(&format!(" {}", (lit ^ !value).to_dimacs()));
        }
        line.push_str(" 0");
        println!("{}", line);
        Ok(10)
    } else {
        println!("s UNSATISFIABLE");
        Ok(20)
    }
}

fn solve_wcnf(path: &Path, config: SolverConfig, time_limit: Option<Duration>) -> Result<i32, Error> {
    let formula = WcnfParser::parse(File::open(path)?)?;
    let mut solver = Solver::with_config(config);

    // every original variable becomes a 0/1 integer variable so the optimization result covers
    // it directly
    let mut vars: Vec<IntVar> = Vec::with_capacity(formula.var_count());
    for _ in 0..formula.var_count() {
        vars.push(solver.new_int_var(0, 1)?);
    }
    let to_internal = |solver: &Solver, lit: Lit| {
        let var = vars[lit.index()];
        solver.eq_lit(var, 1) ^ lit.is_negative()
    };

    let mut objective = LinearFunction::new();
    let mut root_conflict = false;

    for (weight, clause) in formula.iter() {
        let mut lits: Vec<Lit> = clause
            .iter()
            .map(|&lit| to_internal(&solver, lit))
            .collect();

        if weight >= formula.top_weight() {
            if solver.add_clause(&lits).is_err() {
                root_conflict = true;
            }
        } else {
            let relax = solver.new_int_var(0, 1)?;
            lits.push(solver.eq_lit(relax, 1));
            if solver.add_clause(&lits).is_err() {
                root_conflict = true;
            }
            objective.add_term(relax, weight as i64);
        }
    }

    if root_conflict {
        println!("s UNSATISFIABLE");
        return Ok(20);
    }

    let output = solver.minimize(&objective, time_limit);

    println!("c runtime: {:.3}s", output.runtime.as_secs_f64());
    log::info!(
        "conflicts: {} decisions: {} restarts: {}",
        solver.stats().conflicts,
        solver.stats().decisions,
        solver.stats().restarts,
    );

    match output.solution {
        None => {
            if output.timeout {
                println!("s UNKNOWN");
                Ok(0)
            } else {
                println!("s UNSATISFIABLE");
                Ok(20)
            }
        }
        Some(solution) => {
            println!("o {}", output.objective_value);
            if output.proven_optimal {
                println!("s OPTIMUM FOUND");
            } else {
                println!("s SATISFIABLE");
            }
            let mut line = String::from("v");
            for (index, &var) in vars.iter().enumerate() {
                let lit = Lit::from_index(index, solution.value(var) == 1);
                line.push_str(&format!(" {}", lit.to_dimacs()));
            }
            line.push_str(" 0");
            println!("{}", line);
            Ok(if output.proven_optimal { 30 } else { 10 })
        }
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let app = App::new("marrow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A CDCL solver with integer reasoning and pseudo-Boolean optimization")
        .arg(
            Arg::with_name("INPUT")
                .help("DIMACS CNF or WCNF input file")
                .required(true),
        )
        .arg(
            Arg::with_name("time-limit")
                .long("time-limit")
                .takes_value(true)
                .help("Wall clock time limit in seconds"),
        );
    let matches = config_args(app).get_matches();

    let config = parse_config(&matches)?;
    let path = Path::new(matches.value_of("INPUT").unwrap());

    let time_limit = match matches.value_of("time-limit") {
        None => None,
        Some(value) => Some(Duration::from_secs_f64(
            value
                .parse()
                .map_err(|err| anyhow!("invalid time limit: {:?}", err))?,
        )),
    };

    println!("c this is marrow {}", env!("CARGO_PKG_VERSION"));

    let exit_code = if is_wcnf(path)? {
        solve_wcnf(path, config, time_limit)?
    } else {
        solve_cnf(path, config, time_limit)?
    };

    std::process::exit(exit_code);
}
