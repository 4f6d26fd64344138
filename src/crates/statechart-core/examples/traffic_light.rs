//! A traffic light that cycles itself with delayed sends.
//!
//! Run with: `cargo run --example traffic_light`

use serde_json::json;
use statechart_core::{Event, RunOptions, StateChart};

const CHART: &str = r#"
<scxml initial="red">
  <datamodel>
    <data id="cycles" expr="0"/>
  </datamodel>
  <state id="red">
    <onentry>
      <log label="light" expr="'red'"/>
      <send event="go" delay="300ms" id="red-timer"/>
    </onentry>
    <transition event="go" target="green">
      <assign location="cycles" expr="cycles + 1"/>
    </transition>
    <transition event="halt" target="off"/>
  </state>
  <state id="green">
    <onentry>
      <log label="light" expr="'green'"/>
      <send event="caution" delay="300ms"/>
    </onentry>
    <transition event="caution" target="yellow"/>
    <transition event="halt" target="off"/>
  </state>
  <state id="yellow">
    <onentry>
      <log label="light" expr="'yellow'"/>
      <send event="stop" delay="100ms"/>
    </onentry>
    <transition event="stop" target="red"/>
    <transition event="halt" target="off"/>
  </state>
  <final id="off"/>
</scxml>
"#;

#[tokio::main]
async fn main() -> statechart_core::Result<()> {
    let chart = StateChart::from_source(CHART)?;

    let (sink, mut observer) = tokio::sync::mpsc::unbounded_channel();
    let runner = chart.runner(RunOptions::new().with_event_sink(sink));
    let handle = runner.handle();

    // Watch microsteps as they happen.
    let watcher = tokio::spawn(async move {
        while let Some(entry) = observer.recv().await {
            let event = entry
                .event
                .as_ref()
                .map(|e| e.name.as_str())
                .unwrap_or("<startup>");
            println!("[{:>3}] {:<12} {:?}", entry.id, event, entry.configuration);
        }
    });

    // Let it cycle for a while, then switch it off.
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        let _ = handle.post_event(Event::external("halt"));
    });

    let outcome = runner.run(json!({})).await?;
    let _ = watcher.await;

    println!(
        "terminated in {:?} after {} cycles",
        outcome.configuration, outcome.data["cycles"]
    );
    Ok(())
}
