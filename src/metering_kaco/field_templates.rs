use super::command::CommandCode;
use super::structs::{Converter, FieldSpec};

const fn plain(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec { name, description, converter: None, unit: None, device_class: None, scale: 1 }
}

const fn measured(
    name: &'static str,
    description: &'static str,
    converter: Converter,
    unit: &'static str,
    device_class: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        description,
        converter: Some(converter),
        unit: Some(unit),
        device_class: Some(device_class),
        scale: 1,
    }
}

const fn scaled(
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    device_class: &'static str,
    scale: u32,
) -> FieldSpec {
    FieldSpec {
        name,
        description,
        converter: Some(Converter::Float),
        unit: Some(unit),
        device_class: Some(device_class),
        scale,
    }
}

pub const STATUS_DESCRIPTION: &str = "Inverter state
0 just switched on (first start in the morning)
1 waiting, testing grid and generator voltage
2 waiting for shutdown, generator voltage or power too low
3 constant voltage control at feed-in start
4 MPP tracking with search movement (low irradiation)
5 MPP tracking without search movement (high irradiation)
9 fault search after an internal error
10 over-temperature shutdown (heat sink above 80°C)
11 power limitation (too much generator power or heat sink above 65°C)
12 overload shutdown
13 over-voltage shutdown, grid voltage too high
14 grid failure on one of three phases
15 switching to night shutdown";

/// Reply to command 0: instantaneous readings.
pub const READINGS_TEMPLATE: [FieldSpec; 12] = [
    plain("last_command_sent", "Address and remote command"),
    FieldSpec {
        name: "status",
        description: STATUS_DESCRIPTION,
        converter: Some(Converter::Int),
        unit: None,
        device_class: None,
        scale: 1,
    },
    scaled("u_dc", "Generator voltage in V *10", "V", "voltage", 10),
    scaled("i_dc", "Generator current in A *100", "A", "current", 100),
    measured("p_dc", "Generator power in W", Converter::Int, "W", "power"),
    scaled("u_ac", "Grid voltage in V *10", "V", "voltage", 10),
    scaled("i_ac", "Grid current in A *100", "A", "current", 100),
    measured("p_ac", "Feed-in power in W", Converter::Int, "W", "power"),
    measured("temp", "Device temperature in °C", Converter::Int, "°C", "temperature"),
    measured("e_day", "Energy today in Wh", Converter::Int, "Wh", "energy"),
    plain("checksum", "Checksum"),
    plain("type", "Inverter type"),
];

/// Reply to command 3: cumulative counters.
pub const TOTALS_TEMPLATE: [FieldSpec; 8] = [
    plain("last_command_sent", "Address and remote command"),
    measured("p_top", "Peak power in W", Converter::Float, "W", "power"),
    measured("e_day", "Energy today in Wh", Converter::Float, "Wh", "energy"),
    plain("no_idea", "Unidentified up-counting value, possibly total energy in kWh"),
    measured("e_all", "Total energy in kWh", Converter::Float, "kWh", "energy"),
    plain("run_today", "Operating time today in hh:mm"),
    plain("run_all", "Operating time total in h:mm"),
    plain("run_all_again", "Operating time total, possibly a counter, in h:mm"),
];

pub fn get_template(command: CommandCode) -> &'static [FieldSpec] {
    match command {
        CommandCode::Readings => &READINGS_TEMPLATE,
        CommandCode::Totals => &TOTALS_TEMPLATE,
    }
}

/* Every field of every template, first occurrence of a name wins */
pub fn all_fields() -> Vec<&'static FieldSpec> {
    let mut fields: Vec<&'static FieldSpec> = Vec::new();
    for command in CommandCode::ALL {
        for spec in get_template(command) {
            if !fields.iter().any(|f| f.name == spec.name) {
                fields.push(spec);
            }
        }
    }
    return fields;
}
