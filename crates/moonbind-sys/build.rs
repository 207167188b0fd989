fn main() {
    let artifacts = lua_src::Build::new().build(lua_src::Version::Lua54);
    artifacts.print_cargo_metadata();
}
