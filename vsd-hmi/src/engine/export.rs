//! CSV materialisation of the chart buffers. Pure text formatting; no
//! network or timer interaction.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::engine::chart::SeriesBuffer;
use crate::Error;

/// One header row (`Time`, then one column per variable), then one row per
/// axis entry with each variable's value at that index or an empty cell.
pub fn to_csv(axis: &VecDeque<String>, buffers: &[SeriesBuffer]) -> crate::Result<String> {
    if axis.is_empty() {
        return Err(Error::NoData);
    }

    let mut writer = csv::Writer::from_writer(vec![]);

    let mut header = vec!["Time".to_owned()];
    header.extend(buffers.iter().map(SeriesBuffer::label));
    writer.write_record(&header)?;

    for (i, stamp) in axis.iter().enumerate() {
        let mut row = vec![stamp.clone()];
        row.extend(
            buffers
                .iter()
                .map(|buffer| buffer.get(i).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(csv::IntoInnerError::into_error)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Name of the exported artifact, stamped with the export instant in UTC.
pub fn export_filename(now: DateTime<Utc>) -> String {
    format!("chart_{}.csv", now.format("%Y%m%dT%H%M%SZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::chart::{Axis, ChartState};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn populated_chart() -> ChartState {
        let mut chart = ChartState::new(60, Duration::from_secs(1));
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        chart
            .add_variable("pressure", "dht_intake_pressure", "psi", Axis::Right)
            .unwrap();

        for (stamp, temperature, pressure) in [
            ("10:00:00", Some(21.0), Some(100.5)),
            ("10:00:01", Some(21.5), None),
            ("10:00:02", Some(22.0), Some(101.0)),
        ] {
            let values = [
                ("vsd_temperature".to_owned(), temperature),
                ("dht_intake_pressure".to_owned(), pressure),
            ]
            .into_iter()
            .collect();
            chart.append(stamp, &values);
        }
        chart
    }

    #[test]
    fn empty_axis_is_no_data() {
        let chart = ChartState::new(60, Duration::from_secs(1));
        assert!(matches!(
            to_csv(chart.axis(), chart.buffers()),
            Err(Error::NoData)
        ));
    }

    #[test]
    fn rows_match_the_axis_and_missing_samples_are_empty_cells() {
        let chart = populated_chart();
        let csv = to_csv(chart.axis(), chart.buffers()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 1 + chart.axis().len());
        assert_eq!(lines[0], "Time,temperature [°C],pressure [psi]");
        assert_eq!(lines[1], "10:00:00,21,100.5");
        assert_eq!(lines[2], "10:00:01,21.5,");
        assert_eq!(lines[3], "10:00:02,22,101");

        for line in &lines {
            assert_eq!(line.matches(',').count(), chart.buffers().len());
        }
    }

    #[test]
    fn labels_with_separators_are_quoted() {
        let mut chart = ChartState::new(60, Duration::from_secs(1));
        chart
            .add_variable("flow, corrected", "dht_flow", "m3/h", Axis::Left)
            .unwrap();
        chart.append(
            "10:00:00",
            &[("dht_flow".to_owned(), Some(3.5))].into_iter().collect(),
        );

        let csv = to_csv(chart.axis(), chart.buffers()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Time,\"flow, corrected [m3/h]\"");
        assert_eq!(lines[1], "10:00:00,3.5");
    }

    #[test]
    fn filename_is_utc_stamped() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-05-01T13:37:42Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(export_filename(now), "chart_20240501T133742Z.csv");
    }
}
