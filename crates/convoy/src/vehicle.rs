#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VehicleClass {
    #[default]
    Default,
    Sports,
    Truck,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleStats {
    pub max_speed: f32,
    pub acceleration: f32,
    pub handling: f32,
    pub braking: f32,
    pub mass: f32,
    pub drag: f32,
    pub color: u32,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [Self::Default, Self::Sports, Self::Truck];

    /// Unrecognised names fall back to `Default`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "sports" => Self::Sports,
            "truck" => Self::Truck,
            "default" => Self::Default,
            other => {
                log::debug!("Unknown vehicle class {:?}, using default", other);
                Self::Default
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sports => "sports",
            Self::Truck => "truck",
        }
    }

    pub fn stats(&self) -> VehicleStats {
        match self {
            Self::Default => VehicleStats {
                max_speed: 40.0,
                acceleration: 10.0,
                handling: 0.5,
                braking: 0.7,
                mass: 1000.0,
                drag: 0.3,
                color: 0xFF5500,
            },
            Self::Sports => VehicleStats {
                max_speed: 60.0,
                acceleration: 15.0,
                handling: 0.8,
                braking: 0.9,
                mass: 1200.0,
                drag: 0.25,
                color: 0x0055FF,
            },
            Self::Truck => VehicleStats {
                max_speed: 30.0,
                acceleration: 5.0,
                handling: 0.3,
                braking: 0.5,
                mass: 2500.0,
                drag: 0.5,
                color: 0x005500,
            },
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
