// file: src/database/compute.rs
// description: runs the scoring sql scripts with parameter substitution
// reference: https://docs.rs/futures/latest/futures/stream/

use crate::database::client::{DatabaseUrl, PostgresClient, read_script};
use crate::database::ingest::Ingestor;
use crate::error::Result;
use crate::models::ComputePart;
use crate::pipeline::progress::ProgressTracker;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

pub const SIGCTL_SEARCH_DIST: u32 = 25;

#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    /// Inserted verbatim, quotes included when the script needs a literal.
    Raw(String),
    Null,
}

impl fmt::Display for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Int(v) => write!(f, "{v}"),
            BindValue::Float(v) => write!(f, "{v}"),
            BindValue::Raw(v) => f.write_str(v),
            BindValue::Null => f.write_str("NULL"),
        }
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Int(value)
    }
}

impl From<u32> for BindValue {
    fn from(value: u32) -> Self {
        BindValue::Int(i64::from(value))
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        BindValue::Float(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Raw(value.to_string())
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(BindValue::Null, Into::into)
    }
}

/// Named values replacing `:name` placeholders in a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindParams(Vec<(String, BindValue)>);

impl BindParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<BindValue>) -> Self {
        self.0.push((name.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Replaces placeholders longest name first, so `:score1` never clobbers `:score10`.
pub fn substitute(sql: &str, params: &BindParams) -> String {
    let mut names: Vec<&(String, BindValue)> = params.0.iter().collect();
    names.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    names.iter().fold(sql.to_string(), |statements, (name, value)| {
        statements.replace(&format!(":{name}"), &value.to_string())
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    pub colleges: u32,
    pub community_centers: u32,
    pub doctors: u32,
    pub dentists: u32,
    pub hospitals: u32,
    pub pharmacies: u32,
    pub parks: u32,
    pub retail: u32,
    pub transit: u32,
    pub universities: u32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            colleges: 100,
            community_centers: 50,
            doctors: 50,
            dentists: 50,
            hospitals: 50,
            pharmacies: 50,
            parks: 50,
            retail: 50,
            transit: 75,
            universities: 150,
        }
    }
}

impl Tolerance {
    /// Destinations clustered with a tolerance, in script order.
    pub fn destinations(&self) -> [(&'static str, u32); 10] {
        [
            ("colleges", self.colleges),
            ("community_centers", self.community_centers),
            ("doctors", self.doctors),
            ("dentists", self.dentists),
            ("hospitals", self.hospitals),
            ("pharmacies", self.pharmacies),
            ("parks", self.parks),
            ("retail", self.retail),
            ("transit", self.transit),
            ("universities", self.universities),
        ]
    }
}

pub const UNCLUSTERED_DESTINATIONS: [&str; 3] = ["schools", "social_services", "supermarkets"];

/// Recreation access only counts long enough paths.
#[derive(Debug, Clone, Copy)]
pub struct PathConstraint {
    pub min_length: u32,
    pub min_bbox: u32,
}

impl Default for PathConstraint {
    fn default() -> Self {
        Self {
            min_length: 4800,
            min_bbox: 3300,
        }
    }
}

/// Roads associated with a block must overlap its buffer over a minimum length.
#[derive(Debug, Clone, Copy)]
pub struct BlockRoad {
    pub buffer: u32,
    pub min_length: u32,
}

impl Default for BlockRoad {
    fn default() -> Self {
        Self {
            buffer: 15,
            min_length: 30,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Score {
    pub total: u32,
    pub people: u32,
    pub opportunity: u32,
    pub core_services: u32,
    pub retail: u32,
    pub recreation: u32,
    pub transit: u32,
}

impl Default for Score {
    fn default() -> Self {
        Self {
            total: 100,
            people: 15,
            opportunity: 20,
            core_services: 20,
            retail: 15,
            recreation: 15,
            transit: 15,
        }
    }
}

impl Score {
    pub fn bind_params(&self) -> BindParams {
        BindParams::new()
            .with("total", self.total)
            .with("people", self.people)
            .with("opportunity", self.opportunity)
            .with("core_services", self.core_services)
            .with("retail", self.retail)
            .with("recreation", self.recreation)
            .with("transit", self.transit)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub name: &'static str,
    pub first: f64,
    pub second: f64,
    pub third: f64,
    pub max_score: u32,
}

impl Access {
    const fn new(name: &'static str, first: f64, second: f64, third: f64) -> Self {
        Self {
            name,
            first,
            second,
            third,
            max_score: 1,
        }
    }

    pub fn bind_params(&self) -> BindParams {
        BindParams::new()
            .with("first", self.first)
            .with("second", self.second)
            .with("third", self.third)
            .with("max_score", self.max_score)
    }
}

pub const ACCESSES: [Access; 13] = [
    Access::new("colleges", 0.7, 0.0, 0.0),
    Access::new("community_centers", 0.4, 0.2, 0.1),
    Access::new("doctors", 0.4, 0.2, 0.1),
    Access::new("dentists", 0.4, 0.2, 0.1),
    Access::new("hospitals", 0.7, 0.0, 0.0),
    Access::new("pharmacies", 0.4, 0.2, 0.1),
    Access::new("parks", 0.3, 0.2, 0.2),
    Access::new("retail", 0.4, 0.2, 0.1),
    Access::new("schools", 0.3, 0.2, 0.2),
    Access::new("social_services", 0.7, 0.0, 0.0),
    Access::new("supermarkets", 0.6, 0.2, 0.0),
    Access::new("transit", 0.6, 0.0, 0.0),
    Access::new("universities", 0.7, 0.0, 0.0),
];

/// Step thresholds shared by the population and jobs access scripts.
pub fn access_step_params() -> BindParams {
    BindParams::new()
        .with("max_score", 1u32)
        .with("step1", 0.03)
        .with("score1", 0.1)
        .with("step2", 0.2)
        .with("score2", 0.4)
        .with("step3", 0.5)
        .with("score3", 0.8)
}

/// Defaults of a road class scored by `stress_segments_higher_order.sql`.
pub fn higher_order_params(class: &str, default_speed: u32, default_lanes: u32) -> BindParams {
    BindParams::new()
        .with("class", class)
        .with("default_speed", default_speed)
        .with("default_lanes", default_lanes)
        .with("default_parking", 1u32)
        .with("default_parking_width", 8u32)
        .with("default_facility_width", 5u32)
}

#[derive(Debug, Clone)]
pub struct ComputeSettings {
    pub output_srid: u32,
    pub buffer: u32,
    pub max_trip_distance: u32,
    pub state_default_speed: Option<u32>,
    pub city_default_speed: Option<u32>,
    pub import_jobs: bool,
    pub experimental: bool,
    pub workers: usize,
}

pub struct Computer<'a> {
    client: &'a PostgresClient,
    sql_dir: PathBuf,
    settings: ComputeSettings,
    tolerance: Tolerance,
    path_constraint: PathConstraint,
    block_road: BlockRoad,
    score: Score,
}

impl<'a> Computer<'a> {
    pub fn new(
        client: &'a PostgresClient,
        sql_dir: impl Into<PathBuf>,
        settings: ComputeSettings,
    ) -> Self {
        Self {
            client,
            sql_dir: sql_dir.into(),
            settings,
            tolerance: Tolerance::default(),
            path_constraint: PathConstraint::default(),
            block_road: BlockRoad::default(),
            score: Score::default(),
        }
    }

    fn script(&self, relative: &str) -> PathBuf {
        self.sql_dir.join(relative)
    }

    async fn run(&self, relative: &str, params: &BindParams) -> Result<()> {
        let path = self.script(relative);
        debug!("Execute {}", path.display());
        let sql = read_script(&path).await?;
        if !params.is_empty() {
            debug!("bind_params={params:?}");
        }
        self.client.execute(&substitute(&sql, params)).await
    }

    async fn run_plain(&self, relative: &str) -> Result<()> {
        self.run(relative, &BindParams::new()).await
    }

    /// Features are required by every other part.
    pub async fn features(&self) -> Result<()> {
        let srid = BindParams::new().with("nb_output_srid", self.settings.output_srid);

        info!("Update field names");
        self.run("prepare_tables.sql", &srid).await?;

        info!("Clip OSM source data to boundary + buffer");
        self.run(
            "clip_osm.sql",
            &BindParams::new().with("nb_boundary_buffer", self.settings.buffer),
        )
        .await?;

        info!("Removing paths that prohibit bicycles");
        self.client
            .execute("DELETE FROM neighborhood_osm_full_line WHERE bicycle='no' and highway='path';")
            .await?;

        info!("Setting values on road segments");
        for script in ["one_way.sql", "width_ft.sql", "functional_class.sql"] {
            self.run_plain(&format!("features/{script}")).await?;
        }
        self.run("features/paths.sql", &srid).await?;
        for script in [
            "speed_limit.sql",
            "lanes.sql",
            "park.sql",
            "bike_infra.sql",
            "class_adjustments.sql",
            "legs.sql",
        ] {
            self.run_plain(&format!("features/{script}")).await?;
        }

        let search = BindParams::new().with("sigctl_search_dist", SIGCTL_SEARCH_DIST);
        for script in ["signalized.sql", "stops.sql", "rrfb.sql", "island.sql"] {
            self.run(&format!("features/{script}"), &search).await?;
        }
        Ok(())
    }

    pub async fn stress(&self) -> Result<()> {
        info!("Calculating stress");
        self.run_plain("stress/stress_motorway-trunk.sql").await?;

        for (class, speed, lanes) in [
            ("primary", 40, 2),
            ("secondary", 40, 2),
            ("tertiary", 30, 1),
        ] {
            info!("Stress: {class}");
            self.run(
                "stress/stress_segments_higher_order.sql",
                &higher_order_params(class, speed, lanes),
            )
            .await?;
        }

        info!("Stress: residential");
        self.run(
            "stress/stress_segments_lower_order_res.sql",
            &BindParams::new()
                .with("class", "residential")
                .with("default_lanes", 1u32)
                .with("default_parking", 1u32)
                .with("default_roadway_width", 27u32)
                .with("state_default", self.settings.state_default_speed)
                .with("city_default", self.settings.city_default_speed),
        )
        .await?;

        info!("Stress: unclassified");
        self.run(
            "stress/stress_segments_lower_order.sql",
            &BindParams::new()
                .with("class", "unclassified")
                .with("default_speed", 25u32)
                .with("default_lanes", 1u32)
                .with("default_parking", 1u32)
                .with("default_roadway_width", 27u32),
        )
        .await?;

        for script in [
            "stress_living_street.sql",
            "stress_track.sql",
            "stress_path.sql",
            "stress_one_way_reset.sql",
            "stress_motorway-trunk_ints.sql",
            "stress_primary_ints.sql",
            "stress_secondary_ints.sql",
        ] {
            self.run_plain(&format!("stress/{script}")).await?;
        }

        info!("Stress: tertiary intersections");
        let intersections = BindParams::new()
            .with("primary_speed", 40u32)
            .with("secondary_speed", 40u32)
            .with("primary_lanes", 2u32)
            .with("secondary_lanes", 2u32);
        self.run("stress/stress_tertiary_ints.sql", &intersections)
            .await?;
        self.run(
            "stress/stress_lesser_ints.sql",
            &intersections
                .clone()
                .with("tertiary_speed", 30u32)
                .with("tertiary_lanes", 1u32),
        )
        .await?;
        self.run_plain("stress/stress_link_ints.sql").await
    }

    /// Runs one script per parameter set over a pool of connections.
    async fn run_parallel(&self, relative: &str, param_sets: Vec<BindParams>) -> Result<()> {
        let path = self.script(relative);
        let template = read_script(&path).await?;
        let workers = self.settings.workers.max(1);
        let pool = PostgresClient::connect_many(self.client.url(), workers).await?;
        let progress = ProgressTracker::new(param_sets.len());
        progress.set_message(relative.to_string());

        let result = run_until_failure(param_sets, workers, &progress, |index, params| {
            trace!("{params:?}");
            let client = pool[index % pool.len()].clone();
            let sql = substitute(&template, &params);
            async move { client.execute(&sql).await }
        })
        .await;

        let stats = progress.get_stats();
        progress.finish();
        debug!(
            "{relative}: {} done, {} failed, {} skipped in {}s ({:.1}/s, {:.1}% success)",
            stats.tasks_completed,
            stats.tasks_failed,
            stats.tasks_skipped,
            stats.duration_secs,
            stats.tasks_per_second(),
            stats.success_rate()
        );
        result
    }

    pub async fn connectivity(&self) -> Result<()> {
        let settings = &self.settings;
        let srid = BindParams::new().with("nb_output_srid", settings.output_srid);

        info!("BUILDING: Building network");
        self.run("connectivity/build_network.sql", &srid).await?;
        self.run(
            "connectivity/census_blocks.sql",
            &BindParams::new()
                .with("block_road_buffer", self.block_road.buffer)
                .with("block_road_min_length", self.block_road.min_length)
                .with("nb_output_srid", settings.output_srid),
        )
        .await?;

        let mut road_ids = self
            .client
            .query_i64s("select road_id::bigint FROM neighborhood_ways")
            .await?;
        road_ids.sort_unstable();

        for level in ["high", "low"] {
            info!("CONNECTIVITY: Reachable roads {level} stress");
            self.run_plain(&format!("connectivity/reachable_roads_{level}_stress_prep.sql"))
                .await?;
            let param_sets = road_ids
                .iter()
                .map(|id| {
                    BindParams::new()
                        .with("road_id", *id)
                        .with("nb_max_trip_distance", settings.max_trip_distance)
                })
                .collect();
            self.run_parallel(
                &format!("connectivity/reachable_roads_{level}_stress_calc.sql"),
                param_sets,
            )
            .await?;
            self.run_plain(&format!("connectivity/reachable_roads_{level}_stress_cleanup.sql"))
                .await?;
        }

        info!("CONNECTIVITY: Connected census blocks");
        self.run_plain("connectivity/connected_census_blocks_prep.sql")
            .await?;
        let mut block_ids = self
            .client
            .query_texts("select blockid10::text FROM neighborhood_census_blocks")
            .await?;
        block_ids.sort_unstable();
        let param_sets = block_ids
            .iter()
            .map(|id| {
                BindParams::new()
                    .with("nb_max_trip_distance", settings.max_trip_distance)
                    .with("nb_output_srid", settings.output_srid)
                    .with("block_id", BindValue::Raw(format!("'{}'", id.replace('\'', "''"))))
            })
            .collect();
        self.run_parallel("connectivity/connected_census_blocks_calc.sql", param_sets)
            .await?;
        self.run_plain("connectivity/connected_census_blocks.sql")
            .await?;

        info!("METRICS: Access: population");
        self.run("connectivity/access_population.sql", &access_step_params())
            .await?;

        if settings.import_jobs {
            info!("METRICS: Access: jobs");
            self.run_plain("connectivity/census_block_jobs.sql").await?;
            self.run("connectivity/access_jobs.sql", &access_step_params())
                .await?;
        }

        info!("METRICS: Destinations");
        for (name, tolerance) in self.tolerance.destinations() {
            self.run(
                &format!("connectivity/destinations/{name}.sql"),
                &srid.clone().with("cluster_tolerance", tolerance),
            )
            .await?;
        }
        for name in UNCLUSTERED_DESTINATIONS {
            self.run(&format!("connectivity/destinations/{name}.sql"), &srid)
                .await?;
        }

        info!("METRICS: Accesses");
        for access in ACCESSES {
            self.run(
                &format!("connectivity/access_{}.sql", access.name),
                &access.bind_params(),
            )
            .await?;
        }

        self.run(
            "connectivity/access_trails.sql",
            &BindParams::new()
                .with("first", 0.7)
                .with("second", 0.2)
                .with("third", 0u32)
                .with("max_score", 1u32)
                .with("min_path_length", self.path_constraint.min_length)
                .with("min_bbox_length", self.path_constraint.min_bbox),
        )
        .await?;

        let score = self.score.bind_params();
        self.run("connectivity/access_overall.sql", &score).await?;
        self.run_plain("connectivity/score_inputs.sql").await?;
        self.run("connectivity/overall_scores.sql", &score).await
    }

    pub async fn measure(&self) -> Result<()> {
        info!("MILEAGE: Calculating mileage");
        self.run_plain("features/calculate_mileage.sql").await
    }

    /// Features always run. Measure only runs in experimental mode.
    pub async fn compute_parts(&self, parts: &[ComputePart]) -> Result<()> {
        info!("Compute features");
        self.features().await?;

        if parts.contains(&ComputePart::Stress) {
            info!("Compute stress");
            self.stress().await?;
        }

        if parts.contains(&ComputePart::Connectivity) {
            info!("Compute connectivity");
            self.connectivity().await?;
        }

        if parts.contains(&ComputePart::Measure) {
            if self.settings.experimental {
                info!("Compute mileage");
                self.measure().await?;
            } else {
                debug!("Skipping mileage, experimental mode is off");
            }
        }
        Ok(())
    }
}

/// Connects, reads the speed defaults saved at import time and computes `parts`.
pub async fn compute(
    url: &DatabaseUrl,
    scripts_dir: &Path,
    mut settings: ComputeSettings,
    parts: &[ComputePart],
) -> Result<()> {
    let client = PostgresClient::connect(url).await?;
    let (state_speed, city_speed) = Ingestor::new(&client, scripts_dir)
        .retrieve_default_speed_limits()
        .await?;
    settings.state_default_speed = state_speed;
    settings.city_default_speed = city_speed;
    Computer::new(&client, scripts_dir.join("sql"), settings)
        .compute_parts(parts)
        .await
}

/// Runs `task` over `items` with at most `workers` in flight. Once a task fails, the
/// tasks that have not started yet are skipped and the first error is returned.
pub async fn run_until_failure<T, F, Fut>(
    items: Vec<T>,
    workers: usize,
    progress: &ProgressTracker,
    task: F,
) -> Result<()>
where
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let failed = AtomicBool::new(false);
    let failed = &failed;
    let task = &task;

    let outcomes: Vec<Option<Result<()>>> = stream::iter(items.into_iter().enumerate())
        .map(move |(index, item)| async move {
            if failed.load(Ordering::SeqCst) {
                return None;
            }
            let result = task(index, item).await;
            if result.is_err() {
                failed.store(true, Ordering::SeqCst);
            }
            Some(result)
        })
        .buffer_unordered(workers.max(1))
        .inspect(|outcome| match outcome {
            Some(Ok(())) => progress.inc_completed(),
            Some(Err(_)) => progress.inc_failed(),
            None => progress.inc_skipped(),
        })
        .collect()
        .await;

    outcomes.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BnaError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_run_until_failure_skips_pending_tasks() {
        let progress = ProgressTracker::hidden(20);
        let started = AtomicUsize::new(0);
        let started_ref = &started;

        let result = run_until_failure((0..20).collect(), 2, &progress, |_, item: u32| async move {
            started_ref.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if item == 3 {
                Err(BnaError::Validation(format!("task {item} failed")))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(BnaError::Validation(message)) if message == "task 3 failed"));
        let started = started.load(Ordering::SeqCst);
        let stats = progress.get_stats();
        assert!(started < 20);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_completed + stats.tasks_failed, started);
        assert_eq!(stats.tasks_skipped, 20 - started);
    }

    #[tokio::test]
    async fn test_run_until_failure_runs_everything_on_success() {
        let progress = ProgressTracker::hidden(5);
        let result = run_until_failure(vec![(); 5], 3, &progress, |_, ()| async { Ok(()) }).await;
        assert!(result.is_ok());
        let stats = progress.get_stats();
        assert_eq!(stats.tasks_completed, 5);
        assert_eq!(stats.tasks_skipped, 0);
        assert_eq!(stats.success_rate(), 100.0);
    }

    #[test]
    fn test_substitute_longest_name_first() {
        let params = BindParams::new()
            .with("step1", 0.03)
            .with("step10", 0.5)
            .with("class", "primary");
        assert_eq!(
            substitute("SELECT :step10, :step1 WHERE c = ':class'", &params),
            "SELECT 0.5, 0.03 WHERE c = 'primary'"
        );
    }

    #[test]
    fn test_substitute_null_and_quoted_values() {
        let params = BindParams::new()
            .with("state_default", None::<u32>)
            .with("city_default", Some(25u32))
            .with("block_id", BindValue::Raw("'350010001001000'".to_string()));
        assert_eq!(
            substitute(":state_default :city_default :block_id", &params),
            "NULL 25 '350010001001000'"
        );
    }

    #[test]
    fn test_substitute_without_params() {
        assert_eq!(substitute("SELECT 1;", &BindParams::new()), "SELECT 1;");
    }

    #[test]
    fn test_parameter_tables() {
        assert_eq!(Tolerance::default().destinations()[8], ("transit", 75));
        assert_eq!(ACCESSES.len(), 13);
        assert_eq!(ACCESSES[10].name, "supermarkets");
        assert_eq!(
            substitute(":first/:second/:third/:max_score", &ACCESSES[1].bind_params()),
            "0.4/0.2/0.1/1"
        );
        assert_eq!(
            substitute(":total-:core_services", &Score::default().bind_params()),
            "100-20"
        );
    }

    #[test]
    fn test_higher_order_params() {
        assert_eq!(
            substitute(
                ":class :default_speed :default_lanes :default_parking_width",
                &higher_order_params("tertiary", 30, 1)
            ),
            "tertiary 30 1 8"
        );
    }
}
