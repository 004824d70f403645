#[macro_use]
extern crate log;
extern crate env_logger;
extern crate getopts;
extern crate promstat;

use getopts::Options;
use promstat::{Role, Stat, Stats};
use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const ROUTES: [&str; 3] = ["/users", "/orders", "/health"];

struct Generator {
    stats: Arc<Stats>,
    done: Arc<AtomicBool>,
}

impl Generator {
    fn new(stats: Arc<Stats>, done: Arc<AtomicBool>) -> Generator { Generator { stats, done } }

    fn run(&self) {
        let http: &dyn Stat = self.stats.role(Role::HttpServer);
        let mut i = 0usize;
        while !self.done.load(Ordering::Relaxed) {
            let route = ROUTES[i % ROUTES.len()];
            let start = self.stats.begin_time();

            if i % 4 == 0 {
                self.stats.cache_miss().incr("get_user", &[]);
                self.stats.db_query_end_time(start, "user", "user_info");
            } else {
                self.stats.cache_hit().incr("get_user", &[]);
            }

            http.timing("GET", self.stats.time_sub(start), &[route]);
            http.incr("GET", &[route, "200"]);
            i += 1;
        }
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optopt("d", "duration", "number of seconds to run for", "INTEGER");
    opts.optopt("", "prefix", "metric name prefix", "STRING");
    opts.optflag("x", "exposition", "print the text exposition when done");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        },
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    info!("promstat benchmark");

    let producers: usize = matches
        .opt_str("producers")
        .unwrap_or_else(|| "1".to_owned())
        .parse()
        .unwrap();
    let seconds: u64 = matches
        .opt_str("duration")
        .unwrap_or_else(|| "10".to_owned())
        .parse()
        .unwrap();
    let prefix = matches.opt_str("prefix").unwrap_or_else(|| "go".to_owned());

    info!("producers: {}", producers);
    info!("duration: {}s", seconds);
    info!("prefix: {}", prefix);

    let stats = match Stats::builder().prefix(&prefix).build() {
        Ok(stats) => Arc::new(stats),
        Err(e) => {
            error!("failed to register metrics: {}", e);
            return;
        },
    };

    info!("catalogue configured");

    // Spin up our sample producers.
    let done = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = (0..producers)
        .map(|_| {
            let generator = Generator::new(Arc::clone(&stats), Arc::clone(&done));
            thread::spawn(move || generator.run())
        })
        .collect();

    // Poll the counters to figure out the sample rate.
    let hits = stats.cache_hit().counter().unwrap().with_label_values(&["get_user"]);
    let misses = stats.cache_miss().counter().unwrap().with_label_values(&["get_user"]);
    let mut total = 0.0;
    let mut t0 = Instant::now();
    for _ in 0..seconds {
        thread::sleep(Duration::new(1, 0));

        let t1 = Instant::now();
        let turn_total = hits.get() + misses.get();
        let rate = (turn_total - total) / (t1 - t0).as_secs_f64();
        total = turn_total;

        info!("rate: {} requests per second", rate);
        t0 = t1;
    }

    done.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }

    info!("total requests recorded: {}", total);

    if matches.opt_present("exposition") {
        match stats.gather_text() {
            Ok(text) => print!("{}", text),
            Err(e) => error!("failed to render metrics: {}", e),
        }
    }
}
