use super::*;
use std::cell::Cell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Accumulates its elapsed time into a shared slot on drop, so a phase is
/// accounted for on every exit path out of its scope.
pub struct ScopedTimer<'a> {
    start: Instant,
    accumulator: &'a Cell<Floating>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(accumulator: &'a Cell<Floating>) -> Self {
        ScopedTimer {
            start: Instant::now(),
            accumulator,
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.accumulator
            .set(self.accumulator.get() + self.start.elapsed().as_secs_f64());
    }
}

/// Per-phase accumulated times of one solve, in seconds.
#[derive(Debug, Default)]
pub struct PhaseTimers {
    pub total: Cell<Floating>,
    pub grad: Cell<Floating>,
    pub assembly: Cell<Floating>,
    pub inverting: Cell<Floating>,
    pub line_search: Cell<Floating>,
    pub obj_fun: Cell<Floating>,
    pub constraint_set_update: Cell<Floating>,
}

impl PhaseTimers {
    pub fn reset(&self) {
        self.total.set(0.0);
        self.grad.set(0.0);
        self.assembly.set(0.0);
        self.inverting.set(0.0);
        self.line_search.set(0.0);
        self.obj_fun.set(0.0);
        self.constraint_set_update.set(0.0);
    }
}

/// Line-buffered per-iteration energy trace:
/// `<energy>,<grad norm>[,<component value>,<component grad norm>]*`,
/// 12 significant digits, flushed after every row.
pub struct EnergyTrace {
    out: BufWriter<File>,
}

impl EnergyTrace {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(EnergyTrace {
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn append(
        &mut self,
        energy: Floating,
        grad_norm: Floating,
        components: &[(Floating, Floating)],
    ) -> std::io::Result<()> {
        let mut row = format!(
            "{},{}",
            fmt_significant(energy, 12),
            fmt_significant(grad_norm, 12)
        );
        for (value, component_grad_norm) in components {
            row.push(',');
            row.push_str(&fmt_significant(*value, 12));
            row.push(',');
            row.push_str(&fmt_significant(*component_grad_norm, 12));
        }
        writeln!(self.out, "{row}")?;
        self.out.flush()
    }
}

/// Peak resident set size in bytes, from `VmHWM` on Linux; zero elsewhere.
pub fn peak_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmHWM:") {
                    if let Some(kib) = rest
                        .split_whitespace()
                        .next()
                        .and_then(|v| v.parse::<u64>().ok())
                    {
                        return kib * 1024;
                    }
                }
            }
        }
    }
    0
}

#[cfg(test)]
mod instrument_tests {
    use super::*;

    #[test]
    fn scoped_timer_accumulates_on_drop() {
        let slot = Cell::new(0.0);
        {
            let _timer = ScopedTimer::new(&slot);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let first = slot.get();
        assert!(first > 0.0);
        {
            let _timer = ScopedTimer::new(&slot);
        }
        assert!(slot.get() >= first);
    }

    #[test]
    fn energy_trace_rows_parse_back() {
        let path = std::env::temp_dir().join(format!(
            "descent_solvers_trace_{}.csv",
            std::process::id()
        ));
        let mut trace = EnergyTrace::create(&path).unwrap();
        trace.append(5.95421809553, 1.25, &[]).unwrap();
        trace
            .append(0.00101793422213, 1e-9, &[(0.5, 0.25)])
            .unwrap();
        drop(trace);

        let contents = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = contents.lines().collect();
        assert_eq!(rows.len(), 2);
        let first: Floating = rows[0].split(',').next().unwrap().parse().unwrap();
        assert!((first - 5.95421809553).abs() < 1e-11);
        let second: Vec<&str> = rows[1].split(',').collect();
        assert_eq!(second.len(), 4);
        let last: Floating = second[0].parse().unwrap();
        assert!((last - 0.00101793422213).abs() < 1e-14);
        std::fs::remove_file(&path).ok();
    }
}
