use crate::props::TruckProperties;

/// Litres burnt per second of driving.
pub fn moving_burn_per_sec(props: &TruckProperties) -> f64 {
    props.fuel_specific_consumption / (1000. * props.fuel_density) * props.engine_power_kw / 3600.
}

/// Litres burnt per second of idling.
pub fn idle_burn_per_sec(props: &TruckProperties) -> f64 {
    props.fuel_idle_lph / 3600.
}

pub fn burn(props: &TruckProperties, fuel: f64, moving: bool) -> f64 {
    let rate = if moving { moving_burn_per_sec(props) } else { idle_burn_per_sec(props) };
    fuel - rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burn_rates() {
        let mut props = TruckProperties::new(90., 40., 30.);
        props.fuel_specific_consumption = 200.;
        props.fuel_density = 0.8;
        props.engine_power_kw = 720.;
        props.fuel_idle_lph = 36.;
        // 200 g/kWh at 720 kW is 144 kg/h, 180 l/h
        assert!((moving_burn_per_sec(&props) - 0.05).abs() < 1e-12);
        assert!((idle_burn_per_sec(&props) - 0.01).abs() < 1e-12);
        assert!((burn(&props, 100., true) - 99.95).abs() < 1e-12);
    }
}
